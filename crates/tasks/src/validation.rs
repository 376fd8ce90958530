//! Request checks that run before any task exists.

use serde_json::Value;

use docproc_core::config::LimitsConfig;
use docproc_core::FileInfo;

use crate::error::TaskError;
use crate::scope::{FREQUENCY_PENALTY, MAX_TEXT_CHARS, MAX_TOKENS, MODEL, PRESENCE_PENALTY, TEMPERATURE, TOP_P};
use crate::types::ParameterMap;

pub fn validate_file(file: &FileInfo, limits: &LimitsConfig) -> Result<(), TaskError> {
    if file.filename.trim().is_empty() {
        return Err(TaskError::Validation("file name is required".into()));
    }
    if file.size == 0 {
        return Err(TaskError::Validation("file is empty".into()));
    }
    let max = limits.max_file_size_bytes();
    if file.size > max {
        return Err(TaskError::FileTooLarge { size: file.size, max });
    }
    let ext = file.extension();
    if !limits.supported_formats.iter().any(|f| f.eq_ignore_ascii_case(&ext)) {
        return Err(TaskError::Validation(format!(
            "unsupported file type '{}', supported: {}",
            if ext.is_empty() { "none" } else { ext.as_str() },
            limits.supported_formats.join(", ")
        )));
    }
    Ok(())
}

/// Returns the trimmed prompt.
pub fn validate_prompt(prompt: &str, limits: &LimitsConfig) -> Result<String, TaskError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(TaskError::Validation("prompt cannot be empty or whitespace only".into()));
    }
    let chars = trimmed.chars().count();
    if chars < limits.prompt_min_chars {
        return Err(TaskError::Validation(format!(
            "prompt must be at least {} characters",
            limits.prompt_min_chars
        )));
    }
    if chars > limits.prompt_max_chars {
        return Err(TaskError::Validation(format!(
            "prompt must be at most {} characters",
            limits.prompt_max_chars
        )));
    }
    Ok(trimmed.to_string())
}

/// Type and range checks on known override keys. Unknown keys pass through.
pub fn validate_overrides(overrides: &ParameterMap) -> Result<(), TaskError> {
    for (key, value) in overrides {
        match key.as_str() {
            TEMPERATURE => number_in(key, value, 0.0, 2.0)?,
            TOP_P => number_in(key, value, 0.0, 1.0)?,
            FREQUENCY_PENALTY | PRESENCE_PENALTY => number_in(key, value, -2.0, 2.0)?,
            MAX_TOKENS => integer_in(key, value, 1, 32_000)?,
            MAX_TEXT_CHARS => integer_in(key, value, 1, u64::MAX)?,
            MODEL => match value {
                Value::String(s) if !s.trim().is_empty() => {}
                _ => return Err(TaskError::Validation("model must be a non-empty string".into())),
            },
            _ => {}
        }
    }
    Ok(())
}

fn number_in(key: &str, value: &Value, min: f64, max: f64) -> Result<(), TaskError> {
    match value.as_f64() {
        Some(v) if (min..=max).contains(&v) => Ok(()),
        Some(v) => Err(TaskError::Validation(format!("{key} must be between {min} and {max}, got {v}"))),
        None => Err(TaskError::Validation(format!("{key} must be a number"))),
    }
}

fn integer_in(key: &str, value: &Value, min: u64, max: u64) -> Result<(), TaskError> {
    match value.as_u64() {
        Some(v) if (min..=max).contains(&v) => Ok(()),
        _ => Err(TaskError::Validation(format!("{key} must be an integer between {min} and {max}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> LimitsConfig {
        LimitsConfig::default()
    }

    fn overrides(key: &str, value: Value) -> ParameterMap {
        [(key.to_string(), value)].into_iter().collect()
    }

    #[test]
    fn accepts_supported_file() {
        let file = FileInfo::new("Notes.MD", 10, "text/markdown");
        assert!(validate_file(&file, &limits()).is_ok());
    }

    #[test]
    fn rejects_oversize_file() {
        let size = limits().max_file_size_bytes() + 1;
        let file = FileInfo::new("big.pdf", size, "application/pdf");
        assert!(matches!(validate_file(&file, &limits()), Err(TaskError::FileTooLarge { .. })));
    }

    #[test]
    fn rejects_unknown_extension_and_empty_file() {
        let exe = FileInfo::new("tool.exe", 10, "application/octet-stream");
        let err = validate_file(&exe, &limits()).unwrap_err();
        assert!(err.to_string().contains("unsupported file type 'exe'"));

        let empty = FileInfo::new("a.txt", 0, "text/plain");
        assert!(matches!(validate_file(&empty, &limits()), Err(TaskError::Validation(_))));
    }

    #[test]
    fn prompt_is_trimmed_and_bounded() {
        assert_eq!(validate_prompt("  summarize  ", &limits()).unwrap(), "summarize");
        assert!(validate_prompt("   ", &limits()).is_err());
        assert!(validate_prompt("hey", &limits()).is_err());
        assert!(validate_prompt(&"x".repeat(4001), &limits()).is_err());
        assert!(validate_prompt(&"x".repeat(4000), &limits()).is_ok());
    }

    #[test]
    fn override_ranges() {
        assert!(validate_overrides(&overrides(TEMPERATURE, json!(1.2))).is_ok());
        assert!(validate_overrides(&overrides(TEMPERATURE, json!(2.5))).is_err());
        assert!(validate_overrides(&overrides(TEMPERATURE, json!("hot"))).is_err());
        assert!(validate_overrides(&overrides(MAX_TOKENS, json!(0))).is_err());
        assert!(validate_overrides(&overrides(MAX_TOKENS, json!(32000))).is_ok());
        assert!(validate_overrides(&overrides(TOP_P, json!(-0.1))).is_err());
        assert!(validate_overrides(&overrides(MODEL, json!(""))).is_err());
        // unknown keys are dropped later by the scope, not rejected here
        assert!(validate_overrides(&overrides("chunk_size", json!(-1))).is_ok());
    }
}
