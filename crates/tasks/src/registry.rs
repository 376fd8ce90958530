//! In-memory task registry.
//!
//! The registry owns every [`Task`] and is the only place status changes.
//! Transitions are checked against [`TaskStatus::can_transition_to`].

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use docproc_core::{ErrorType, FileInfo};

use crate::error::TaskError;
use crate::types::{ParameterMap, StatusCounts, Task, TaskId, TaskResult, TaskStatus};

/// Progress never exceeds this until the task completes.
const MAX_PROGRESS_BEFORE_COMPLETION: f64 = 99.0;

/// Optional fields set alongside a transition.
#[derive(Debug, Default)]
pub struct TransitionFields {
    pub message: Option<String>,
    pub result: Option<TaskResult>,
    pub error: Option<(String, ErrorType)>,
    pub deadline: Option<DateTime<Utc>>,
    pub memory_usage_mb: Option<u64>,
}

impl TransitionFields {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>, error_type: ErrorType) -> Self {
        let message = message.into();
        Self {
            error: Some((message.clone(), error_type)),
            message: Some(message),
            ..Self::default()
        }
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new `pending` task.
    pub fn create(&self, owner: &str, prompt: &str, file_info: FileInfo, config_request: ParameterMap) -> Task {
        let task = Task {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            status: TaskStatus::Pending,
            progress: 0.0,
            message: "Task created".to_string(),
            prompt: prompt.to_string(),
            file_info,
            config_request,
            config_snapshot: None,
            result: None,
            error: None,
            error_type: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            deadline: None,
            memory_usage_mb: None,
            history: vec![TaskStatus::Pending],
        };
        debug!(task_id = %task.id, owner = %owner, "task created");
        self.write().insert(task.id, task.clone());
        task
    }

    /// Move a task to `next`, stamping timestamps and the given fields.
    pub fn transition(&self, id: TaskId, next: TaskStatus, fields: TransitionFields) -> Result<Task, TaskError> {
        let mut tasks = self.write();
        let task = tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;

        if !task.status.can_transition_to(next) {
            error!(task_id = %id, from = %task.status, to = %next, "illegal task transition");
            return Err(TaskError::InvalidTransition {
                id,
                from: task.status,
                to: next,
            });
        }

        let now = Utc::now();
        task.status = next;
        task.history.push(next);
        match next {
            TaskStatus::Processing => {
                task.started_at = Some(now);
            }
            TaskStatus::Completed => {
                task.progress = 100.0;
                task.completed_at = Some(now);
            }
            TaskStatus::Failed | TaskStatus::Cancelled => {
                task.completed_at = Some(now);
            }
            TaskStatus::Pending | TaskStatus::Queued => {}
        }

        if let Some(message) = fields.message {
            task.message = message;
        }
        if let Some(result) = fields.result {
            task.result = Some(result);
        }
        if let Some((error, error_type)) = fields.error {
            task.error = Some(error);
            task.error_type = Some(error_type);
        }
        if let Some(deadline) = fields.deadline {
            task.deadline = Some(deadline);
        }
        if let Some(mb) = fields.memory_usage_mb {
            task.memory_usage_mb = Some(mb);
        }

        debug!(task_id = %id, status = %next, "task transitioned");
        Ok(task.clone())
    }

    /// Look up a task on behalf of `owner`.
    pub fn get(&self, id: TaskId, owner: &str) -> Result<Task, TaskError> {
        let tasks = self.read();
        let task = tasks.get(&id).ok_or(TaskError::NotFound(id))?;
        if task.owner != owner {
            return Err(TaskError::AccessDenied(id));
        }
        Ok(task.clone())
    }

    /// Look up a task without an ownership check.
    pub fn peek(&self, id: TaskId) -> Option<Task> {
        self.read().get(&id).cloned()
    }

    /// Raise progress. Lower values are ignored; terminal tasks are untouched.
    pub fn set_progress(&self, id: TaskId, progress: f64, message: Option<&str>) {
        let mut tasks = self.write();
        let Some(task) = tasks.get_mut(&id) else {
            return;
        };
        if task.status.is_terminal() {
            return;
        }
        let capped = progress.clamp(0.0, MAX_PROGRESS_BEFORE_COMPLETION);
        if capped > task.progress {
            task.progress = capped;
        }
        if let Some(message) = message {
            task.message = message.to_string();
        }
    }

    /// Record the parameters a running task uses.
    pub fn record_config(&self, id: TaskId, snapshot: ParameterMap) {
        if let Some(task) = self.write().get_mut(&id) {
            task.config_snapshot = Some(snapshot);
        }
    }

    /// Drop terminal tasks finished more than `retention` ago.
    pub fn sweep(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;
        let mut tasks = self.write();
        let before = tasks.len();
        tasks.retain(|_, task| {
            !(task.status.is_terminal() && task.completed_at.is_some_and(|at| at < cutoff))
        });
        let removed = before - tasks.len();
        if removed > 0 {
            info!(removed, remaining = tasks.len(), "swept expired tasks");
        }
        removed
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.read().values() {
            counts.bump(task.status);
        }
        counts
    }

    /// All tasks of `owner`, newest first.
    pub fn list(&self, owner: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .read()
            .values()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TaskId, Task>> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TaskId, Task>> {
        self.tasks.write().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn backdate_completion(&self, id: TaskId, by: chrono::Duration) {
        if let Some(task) = self.write().get_mut(&id) {
            task.completed_at = task.completed_at.map(|at| at - by);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn file() -> FileInfo {
        FileInfo::new("report.pdf", 1024, "application/pdf")
    }

    fn registry_with_task() -> (TaskRegistry, Task) {
        let reg = TaskRegistry::new();
        let task = reg.create("alice", "summarize this", file(), ParameterMap::new());
        (reg, task)
    }

    #[test]
    fn create_starts_pending() {
        let (reg, task) = registry_with_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0.0);
        assert_eq!(reg.peek(task.id).unwrap().history, vec![TaskStatus::Pending]);
    }

    #[test]
    fn ids_are_unique() {
        let reg = TaskRegistry::new();
        let a = reg.create("o", "prompt", file(), ParameterMap::new());
        let b = reg.create("o", "prompt", file(), ParameterMap::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn owner_isolation() {
        let (reg, task) = registry_with_task();
        assert!(reg.get(task.id, "alice").is_ok());
        assert!(matches!(reg.get(task.id, "mallory"), Err(TaskError::AccessDenied(_))));
        assert!(matches!(reg.get(Uuid::new_v4(), "alice"), Err(TaskError::NotFound(_))));
    }

    #[test]
    fn completion_stamps_fields() {
        let (reg, task) = registry_with_task();
        let running = reg
            .transition(task.id, TaskStatus::Processing, TransitionFields::default())
            .unwrap();
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        let done = reg
            .transition(task.id, TaskStatus::Completed, TransitionFields::message("done"))
            .unwrap();
        assert_eq!(done.progress, 100.0);
        assert!(done.completed_at.is_some());
        assert_eq!(done.message, "done");
        assert_eq!(
            done.history,
            vec![TaskStatus::Pending, TaskStatus::Processing, TaskStatus::Completed]
        );
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let (reg, task) = registry_with_task();
        reg.transition(task.id, TaskStatus::Cancelled, TransitionFields::default())
            .unwrap();
        let err = reg
            .transition(task.id, TaskStatus::Processing, TransitionFields::default())
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(reg.peek(task.id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn failure_records_error_type() {
        let (reg, task) = registry_with_task();
        reg.transition(task.id, TaskStatus::Processing, TransitionFields::default())
            .unwrap();
        let failed = reg
            .transition(
                task.id,
                TaskStatus::Failed,
                TransitionFields::failed("boom", ErrorType::ProcessingError),
            )
            .unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.error_type, Some(ErrorType::ProcessingError));
        assert!(failed.progress < 100.0);
    }

    #[test]
    fn progress_is_monotonic_and_capped() {
        let (reg, task) = registry_with_task();
        reg.set_progress(task.id, 30.0, Some("reading"));
        reg.set_progress(task.id, 10.0, None);
        assert_eq!(reg.peek(task.id).unwrap().progress, 30.0);
        reg.set_progress(task.id, 150.0, None);
        assert_eq!(reg.peek(task.id).unwrap().progress, 99.0);
        assert_eq!(reg.peek(task.id).unwrap().message, "reading");
    }

    #[test]
    fn progress_frozen_after_terminal() {
        let (reg, task) = registry_with_task();
        reg.set_progress(task.id, 10.0, None);
        reg.transition(task.id, TaskStatus::Cancelled, TransitionFields::default())
            .unwrap();
        reg.set_progress(task.id, 60.0, None);
        assert_eq!(reg.peek(task.id).unwrap().progress, 10.0);
    }

    #[test]
    fn sweep_removes_only_old_terminal_tasks() {
        let reg = TaskRegistry::new();
        let old = reg.create("o", "prompt", file(), ParameterMap::new());
        let fresh = reg.create("o", "prompt", file(), ParameterMap::new());
        let live = reg.create("o", "prompt", file(), ParameterMap::new());
        for id in [old.id, fresh.id] {
            reg.transition(id, TaskStatus::Cancelled, TransitionFields::default())
                .unwrap();
        }
        reg.backdate_completion(old.id, chrono::Duration::hours(25));

        let removed = reg.sweep(Duration::from_secs(24 * 3600));
        assert_eq!(removed, 1);
        assert!(reg.peek(old.id).is_none());
        assert!(reg.peek(fresh.id).is_some());
        assert!(reg.peek(live.id).is_some());
    }

    #[test]
    fn counts_and_list() {
        let reg = TaskRegistry::new();
        let a = reg.create("alice", "prompt", file(), ParameterMap::new());
        reg.create("bob", "prompt", file(), ParameterMap::new());
        reg.transition(a.id, TaskStatus::Queued, TransitionFields::default())
            .unwrap();

        let counts = reg.counts();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.total(), 2);
        assert_eq!(reg.list("alice").len(), 1);
        assert!(reg.list("carol").is_empty());
    }
}
