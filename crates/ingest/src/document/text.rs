use super::PageContent;

/// Decode as UTF-8, replacing invalid sequences.
pub(super) fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

pub fn extract_plain(bytes: &[u8]) -> Vec<PageContent> {
    vec![PageContent::single(decode(bytes).trim().to_string())]
}

pub fn extract_markdown(bytes: &[u8]) -> Vec<PageContent> {
    let text = decode(bytes);

    let mut in_fence = false;
    let mut headings = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix('#') {
            let title = rest.trim_start_matches('#').trim();
            if !title.is_empty() {
                headings.push(title.to_string());
            }
        }
    }

    vec![PageContent {
        page_number: 1,
        text: text.trim().to_string(),
        headings,
    }]
}
