use thiserror::Error;

use docproc_core::ErrorType;
use docproc_storage::StorageError;

use crate::types::{TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("file is {size} bytes, limit is {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("rate limit of {limit} requests per hour exceeded, retry in {retry_after_secs}s")]
    RateLimited { limit: u32, retry_after_secs: u64 },

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("access denied to task {0}")]
    AccessDenied(TaskId),

    #[error("task {id} is already {status}")]
    AlreadyTerminal { id: TaskId, status: TaskStatus },

    #[error("queue is full ({0} tasks waiting)")]
    QueueFull(usize),

    #[error("memory usage {used_percent:.1}% is above the emergency threshold")]
    CircuitOpen { used_percent: f64 },

    #[error("processing API is disabled")]
    Disabled,

    #[error("illegal transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("upload storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl TaskError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            TaskError::Validation(_)
            | TaskError::FileTooLarge { .. }
            | TaskError::NotFound(_)
            | TaskError::AlreadyTerminal { .. } => ErrorType::ValidationError,
            TaskError::RateLimited { .. } => ErrorType::RateLimitError,
            TaskError::AccessDenied(_) => ErrorType::AuthError,
            TaskError::QueueFull(_)
            | TaskError::CircuitOpen { .. }
            | TaskError::Disabled
            | TaskError::InvalidTransition { .. }
            | TaskError::Storage(_) => ErrorType::SystemError,
        }
    }
}
