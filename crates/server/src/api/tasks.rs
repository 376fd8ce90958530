//! Task status, cancellation and listing, all scoped to the caller.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use docproc_tasks::{TaskStatus, TaskView};

use crate::auth::Caller;
use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CancelResponse {
    pub message: String,
    pub task_id: Uuid,
    #[schema(value_type = String, example = "cancelled")]
    pub status: TaskStatus,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TaskListResponse {
    #[schema(value_type = Vec<Object>)]
    pub tasks: Vec<TaskView>,
    pub total: usize,
}

/// A malformed id cannot name any task, so it reads as "not found".
fn parse_task_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::UnknownTask(raw.to_string()))
}

/// Get a task's status
///
/// Includes progress, timestamps, the result once completed, the error once
/// failed, and the queue position while queued.
#[utoipa::path(
    get,
    path = "/api/v2/status/{task_id}",
    tag = "Tasks",
    params(
        ("task_id" = String, Path, description = "Task id")
    ),
    responses(
        (status = 200, description = "Task view", body = Object),
        (status = 401, description = "Missing or invalid API key", body = ErrorBody),
        (status = 403, description = "Task belongs to another caller", body = ErrorBody),
        (status = 404, description = "Task not found", body = ErrorBody)
    ),
    security(("api_key" = []))
)]
pub async fn task_status(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(task_id): Path<String>,
) -> Result<Json<TaskView>, ApiError> {
    let id = parse_task_id(&task_id)?;
    Ok(Json(state.orchestrator.status(id, &identity.owner)?))
}

/// Cancel a task
///
/// Waiting tasks are cancelled immediately. Running tasks are signalled and
/// the response is sent once their cleanup has finished.
#[utoipa::path(
    delete,
    path = "/api/v2/tasks/{task_id}",
    tag = "Tasks",
    params(
        ("task_id" = String, Path, description = "Task id")
    ),
    responses(
        (status = 200, description = "Task cancelled", body = CancelResponse),
        (status = 400, description = "Task already finished", body = ErrorBody),
        (status = 403, description = "Task belongs to another caller", body = ErrorBody),
        (status = 404, description = "Task not found", body = ErrorBody)
    ),
    security(("api_key" = []))
)]
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(task_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = parse_task_id(&task_id)?;
    let task = state.orchestrator.cancel(id, &identity.owner).await?;
    info!(task_id = %id, owner = %identity.owner, status = %task.status, "cancel request handled");
    Ok(Json(CancelResponse {
        message: cancel_message(task.status).to_string(),
        task_id: id,
        status: task.status,
    }))
}

/// A task can reach another terminal state while its cancellation is pending.
fn cancel_message(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Cancelled => "Task cancelled successfully",
        TaskStatus::Completed => "Task completed before it could be cancelled",
        TaskStatus::Failed => "Task failed before it could be cancelled",
        _ => "Cancellation requested",
    }
}

/// List the caller's tasks, newest first
#[utoipa::path(
    get,
    path = "/api/v2/tasks",
    tag = "Tasks",
    responses(
        (status = 200, description = "Caller's tasks", body = TaskListResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorBody)
    ),
    security(("api_key" = []))
)]
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
) -> Json<TaskListResponse> {
    let tasks = state.orchestrator.list(&identity.owner);
    Json(TaskListResponse {
        total: tasks.len(),
        tasks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_message_follows_final_status() {
        assert_eq!(cancel_message(TaskStatus::Cancelled), "Task cancelled successfully");
        assert_eq!(
            cancel_message(TaskStatus::Failed),
            "Task failed before it could be cancelled"
        );
        assert_eq!(
            cancel_message(TaskStatus::Completed),
            "Task completed before it could be cancelled"
        );
        assert_eq!(cancel_message(TaskStatus::Processing), "Cancellation requested");
    }

    #[test]
    fn malformed_task_id_is_unknown() {
        assert!(matches!(parse_task_id("not-a-uuid"), Err(ApiError::UnknownTask(_))));
    }
}
