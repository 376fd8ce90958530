use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use docproc_core::{ErrorType, FileInfo};

pub type TaskId = Uuid;

/// Requested or effective processing parameters, keyed by name.
pub type ParameterMap = BTreeMap<String, serde_json::Value>;

// ── Status ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Queued,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Legal transitions:
    ///
    /// ```text
    /// pending    -> processing | queued | cancelled
    /// queued     -> processing | cancelled
    /// processing -> completed | failed | cancelled
    /// ```
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Processing | Self::Queued | Self::Cancelled),
            Self::Queued => matches!(next, Self::Processing | Self::Cancelled),
            Self::Processing => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Task ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessingMetadata {
    pub prompt_length: usize,
    pub text_length: usize,
    pub response_length: usize,
    /// Parameters the model actually ran with.
    pub model_config: ParameterMap,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskResult {
    pub content: String,
    pub model_used: String,
    pub file_info: FileInfo,
    pub processing_metadata: ProcessingMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub owner: String,
    pub status: TaskStatus,
    /// 0..=100, reaches 100 only on completion.
    pub progress: f64,
    pub message: String,
    pub prompt: String,
    pub file_info: FileInfo,
    /// Overrides the caller asked for.
    pub config_request: ParameterMap,
    /// Effective parameters once the task started running.
    pub config_snapshot: Option<ParameterMap>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub error_type: Option<ErrorType>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    /// Memory estimate reserved while running.
    pub memory_usage_mb: Option<u64>,
    /// Every status this task has held, oldest first.
    #[serde(skip)]
    pub history: Vec<TaskStatus>,
}

impl Task {
    pub fn processing_time(&self) -> Option<f64> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - start).num_milliseconds().max(0) as f64 / 1000.0)
    }

    pub fn model_used(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.model_used.as_str())
    }
}

/// Caller-facing snapshot of a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    /// 0-based rank in the queue while queued.
    pub position: Option<usize>,
    pub processing_time: Option<f64>,
}

// ── Submission ────────────────────────────────────────────────

/// Everything `process()` needs for one request.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub owner: String,
    pub file: FileInfo,
    pub bytes: Bytes,
    pub prompt: String,
    pub overrides: ParameterMap,
}

/// Seconds of expected wait per task ahead in the queue.
pub const SECONDS_PER_QUEUED_TASK: u64 = 60;

/// What the caller learns immediately after `process()`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Submission {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
    /// Present only when queued.
    pub position: Option<usize>,
    /// Rough wait in seconds, present only when queued.
    pub estimated_time: Option<u64>,
    pub config_applied: ParameterMap,
    pub created_at: DateTime<Utc>,
}

/// Number of tasks per status.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub(crate) fn bump(&mut self, status: TaskStatus) {
        let slot = match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Queued => &mut self.queued,
            TaskStatus::Processing => &mut self.processing,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.pending + self.queued + self.processing + self.completed + self.failed + self.cancelled
    }
}
