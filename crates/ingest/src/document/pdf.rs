use super::{ExtractionError, PageContent};

pub fn extract_pdf(bytes: &[u8]) -> Result<Vec<PageContent>, ExtractionError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ExtractionError::Pdf(e.to_string()))?;

    // pdf-extract returns one string; form feeds separate pages.
    let pages: Vec<PageContent> = text
        .split('\x0C')
        .enumerate()
        .filter(|(_, page_text)| !page_text.trim().is_empty())
        .map(|(i, page_text)| PageContent {
            page_number: i + 1,
            text: page_text.trim().to_string(),
            headings: Vec::new(),
        })
        .collect();

    if pages.is_empty() {
        // Scanned or image-only PDF.
        return Err(ExtractionError::Empty("pdf".into()));
    }

    tracing::debug!(pages = pages.len(), "pdf text extracted");
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_a_pdf_error() {
        let err = extract_pdf(b"definitely not a pdf").unwrap_err();
        assert!(matches!(err, ExtractionError::Pdf(_)));
    }
}
