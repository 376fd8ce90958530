use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use docproc_core::FileInfo;

use crate::document::{extract_text, ExtractionError};

/// Per-call extraction settings, taken from the task's effective parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractOptions {
    /// Truncate the extracted text to this many characters.
    pub max_chars: Option<usize>,
}

/// Turns uploaded bytes into text for the model.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        bytes: Bytes,
        file: &FileInfo,
        options: &ExtractOptions,
    ) -> Result<String, ExtractionError>;
}

/// Default extractor backed by [`extract_text`]. Parsing runs on the blocking pool.
#[derive(Debug, Default, Clone)]
pub struct DocumentExtractor;

impl DocumentExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for DocumentExtractor {
    async fn extract(
        &self,
        bytes: Bytes,
        file: &FileInfo,
        options: &ExtractOptions,
    ) -> Result<String, ExtractionError> {
        let filename = file.filename.clone();
        let doc = tokio::task::spawn_blocking(move || extract_text(&bytes, &filename))
            .await
            .map_err(|e| ExtractionError::Io(std::io::Error::other(e)))??;

        if doc.is_empty() {
            return Err(ExtractionError::Empty(doc.filename));
        }

        let mut text = doc.full_text();
        if let Some(limit) = options.max_chars {
            if let Some((cut, _)) = text.char_indices().nth(limit) {
                text.truncate(cut);
            }
        }

        debug!(
            filename = %doc.filename,
            file_type = %doc.file_type,
            pages = doc.pages.len(),
            chars = text.len(),
            "document extracted"
        );
        Ok(text)
    }
}
