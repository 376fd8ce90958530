use serde::{Deserialize, Serialize};

/// Metadata about an uploaded file, captured before the bytes are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// Declared media type, e.g. `application/pdf`.
    pub media_type: String,
}

impl FileInfo {
    pub fn new(filename: impl Into<String>, size: u64, media_type: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            size,
            media_type: media_type.into(),
        }
    }

    /// Lowercased extension without the dot, or empty when there is none.
    pub fn extension(&self) -> String {
        match self.filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
            _ => String::new(),
        }
    }
}

/// Guess a media type from a file extension.
pub fn media_type_for(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "txt" | "text" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        let info = FileInfo::new("Report.PDF", 10, "application/pdf");
        assert_eq!(info.extension(), "pdf");
    }

    #[test]
    fn dotfile_has_no_extension() {
        assert_eq!(FileInfo::new(".env", 1, "text/plain").extension(), "");
        assert_eq!(FileInfo::new("README", 1, "text/plain").extension(), "");
    }

    #[test]
    fn media_type_falls_back_to_octet_stream() {
        assert_eq!(media_type_for("md"), "text/markdown");
        assert_eq!(media_type_for("exe"), "application/octet-stream");
    }
}
