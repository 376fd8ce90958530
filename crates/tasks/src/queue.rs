//! Bounded FIFO of tasks waiting for an admission slot.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::TaskError;
use crate::types::TaskId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueEntry {
    pub task_id: TaskId,
    pub enqueued_at: DateTime<Utc>,
}

pub struct TaskQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    max_size: usize,
}

impl TaskQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    /// Append to the tail. Returns the 0-based position.
    pub fn enqueue(&self, task_id: TaskId) -> Result<usize, TaskError> {
        let mut entries = self.lock();
        if entries.len() >= self.max_size {
            return Err(TaskError::QueueFull(entries.len()));
        }
        entries.push_back(QueueEntry {
            task_id,
            enqueued_at: Utc::now(),
        });
        Ok(entries.len() - 1)
    }

    /// Pop the head.
    pub fn promote_next(&self) -> Option<TaskId> {
        self.lock().pop_front().map(|e| e.task_id)
    }

    pub fn peek(&self) -> Option<QueueEntry> {
        self.lock().front().copied()
    }

    pub fn position_of(&self, task_id: TaskId) -> Option<usize> {
        self.lock().iter().position(|e| e.task_id == task_id)
    }

    /// Remove a task wherever it sits. Returns whether it was queued.
    pub fn remove(&self, task_id: TaskId) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|e| e.task_id == task_id) {
            Some(idx) => entries.remove(idx).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueueEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
