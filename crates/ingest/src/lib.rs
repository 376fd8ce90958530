pub mod document;
pub mod extractor;

pub use document::{extract_text, ExtractedDocument, ExtractionError, PageContent};
pub use extractor::{DocumentExtractor, ExtractOptions, Extractor};
