use super::text::decode;
use super::{ExtractionError, PageContent};

/// Render CSV as `header: value` lines, one blank-line separated block per row.
///
/// Quoted fields with embedded commas are supported; embedded newlines are not.
pub fn extract_csv(bytes: &[u8]) -> Result<Vec<PageContent>, ExtractionError> {
    let text = decode(bytes);
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header = match lines.next() {
        Some(h) => split_row(h),
        None => return Ok(vec![PageContent::single(String::new())]),
    };

    let mut blocks = Vec::new();
    for (n, line) in lines.enumerate() {
        let row = split_row(line);
        if row.len() > header.len() {
            return Err(ExtractionError::Malformed {
                format: "csv",
                reason: format!("row {} has {} fields, header has {}", n + 2, row.len(), header.len()),
            });
        }
        let block = header
            .iter()
            .zip(row.iter().chain(std::iter::repeat(&String::new())))
            .map(|(h, v)| format!("{h}: {v}"))
            .collect::<Vec<_>>()
            .join("\n");
        blocks.push(block);
    }

    Ok(vec![PageContent::single(blocks.join("\n\n"))])
}

fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Pretty-print JSON so the model sees consistent indentation.
pub fn extract_json(bytes: &[u8]) -> Result<Vec<PageContent>, ExtractionError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ExtractionError::Malformed {
            format: "json",
            reason: e.to_string(),
        })?;
    let text = serde_json::to_string_pretty(&value).map_err(|e| ExtractionError::Malformed {
        format: "json",
        reason: e.to_string(),
    })?;
    Ok(vec![PageContent::single(text)])
}
