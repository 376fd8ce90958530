//! `/api/v2` endpoint modules.
//!
//! Each sub-module owns a single responsibility area.

pub mod doc;
mod process;
mod system;
mod tasks;

pub use process::process;
pub use system::{config, health, models};
pub use tasks::{cancel_task, list_tasks, task_status, CancelResponse, TaskListResponse};
