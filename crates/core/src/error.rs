use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories surfaced to callers on failed tasks and rejected requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Bad input, rejected before a task exists.
    ValidationError,
    /// Extraction or generation failed for a running task.
    ProcessingError,
    /// The task exceeded its deadline.
    TimeoutError,
    /// Missing credentials or ownership mismatch.
    AuthError,
    /// Admission, queue or registry fault.
    SystemError,
    /// Caller exceeded the per-owner request budget.
    RateLimitError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::ProcessingError => "processing_error",
            Self::TimeoutError => "timeout_error",
            Self::AuthError => "auth_error",
            Self::SystemError => "system_error",
            Self::RateLimitError => "rate_limit_error",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
