mod pdf;
mod structured;
mod text;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("Malformed {format} content: {reason}")]
    Malformed { format: &'static str, reason: String },
    #[error("No extractable text in {0}")]
    Empty(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A page of extracted text with metadata.
#[derive(Debug, Clone)]
pub struct PageContent {
    /// 1-based page number (for PDFs). Single-page formats use 1.
    pub page_number: usize,
    pub text: String,
    /// Headings found on this page (markdown only).
    pub headings: Vec<String>,
}

impl PageContent {
    pub(crate) fn single(text: String) -> Self {
        Self {
            page_number: 1,
            text,
            headings: Vec::new(),
        }
    }
}

/// Result of extracting text from an uploaded document.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub filename: String,
    /// Normalized extension: "pdf", "txt", "md", "csv", "json".
    pub file_type: String,
    pub pages: Vec<PageContent>,
}

impl ExtractedDocument {
    /// All page text joined with blank lines.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn total_chars(&self) -> usize {
        self.pages.iter().map(|p| p.text.chars().count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }
}

/// Extract text from file bytes, dispatching on the filename extension.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<ExtractedDocument, ExtractionError> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    let (file_type, pages) = match ext.as_str() {
        "pdf" => ("pdf", pdf::extract_pdf(bytes)?),
        "txt" | "text" => ("txt", text::extract_plain(bytes)),
        "md" | "markdown" => ("md", text::extract_markdown(bytes)),
        "csv" => ("csv", structured::extract_csv(bytes)?),
        "json" => ("json", structured::extract_json(bytes)?),
        other => return Err(ExtractionError::UnsupportedType(other.to_string())),
    };

    Ok(ExtractedDocument {
        filename: filename.to_string(),
        file_type: file_type.to_string(),
        pages,
    })
}
