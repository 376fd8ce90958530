use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use docproc_core::ErrorType;
use docproc_llm::InvocationError;

use super::Orchestrator;
use crate::admission::AdmissionPermit;
use crate::registry::TransitionFields;
use crate::scope::ConfigurationScope;
use crate::types::{ProcessingMetadata, Task, TaskId, TaskResult, TaskStatus};

/// A failure attributable to this task alone.
#[derive(Debug)]
struct Failure {
    message: String,
    error_type: ErrorType,
}

impl Failure {
    fn processing(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: ErrorType::ProcessingError,
        }
    }

    fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: ErrorType::TimeoutError,
        }
    }
}

enum Outcome {
    Completed(TaskResult),
    Failed(Failure),
    TimedOut,
    Cancelled,
}

impl Orchestrator {
    /// Drive one admitted task to a terminal state.
    pub(super) async fn run(
        self: Arc<Self>,
        id: TaskId,
        permit: AdmissionPermit,
        cancel: CancellationToken,
        done: CancellationToken,
        deadline: Instant,
    ) {
        let Some(task) = self.registry.peek(id) else {
            error!(task_id = %id, "admitted task vanished from registry");
            self.lock_running().remove(&id);
            done.cancel();
            return;
        };

        let mut scope: Option<ConfigurationScope> = None;
        // Deadline first: a timeout wins over a simultaneous cancellation,
        // including one observed before the timer itself has fired.
        let outcome = tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => Outcome::TimedOut,
            _ = cancel.cancelled() => {
                if Instant::now() >= deadline {
                    Outcome::TimedOut
                } else {
                    Outcome::Cancelled
                }
            }
            result = self.execute(&task, &mut scope) => match result {
                Ok(result) => Outcome::Completed(result),
                Err(failure) => Outcome::Failed(failure),
            },
        };

        self.finalize(id, outcome, scope, permit, done).await;
    }

    async fn execute(&self, task: &Task, scope_slot: &mut Option<ConfigurationScope>) -> Result<TaskResult, Failure> {
        let id = task.id;
        let scope = scope_slot.insert(self.params.apply(id, &task.config_request));
        let effective = scope.effective().clone();
        self.registry.record_config(id, effective.as_map().clone());

        let handle = self
            .upload_handle(id)
            .ok_or_else(|| Failure::processing("uploaded file is no longer available"))?;
        let bytes = self
            .uploads
            .read(&handle)
            .await
            .map_err(|e| Failure::processing(format!("failed to read uploaded file: {e}")))?;
        self.registry.set_progress(id, 30.0, Some("Extracting text"));

        let extracted = self
            .extractor
            .extract(bytes, &task.file_info, &effective.extract_options())
            .await;
        // The upload is not needed past this point, whatever the result.
        self.discard_upload(id).await;
        let text = extracted.map_err(|e| Failure::processing(format!("text extraction failed: {e}")))?;
        self.registry.set_progress(id, 60.0, Some("Generating response"));

        let params = effective.generation_params();
        let completion = self
            .invoker
            .generate(&task.prompt, &text, &params)
            .await
            .map_err(|e| match e {
                InvocationError::Timeout => Failure::timeout(e.to_string()),
                other => Failure::processing(other.to_string()),
            })?;
        self.registry.set_progress(id, 90.0, Some("Finalizing"));

        Ok(TaskResult {
            processing_metadata: ProcessingMetadata {
                prompt_length: task.prompt.chars().count(),
                text_length: text.chars().count(),
                response_length: completion.content.chars().count(),
                model_config: effective.as_map().clone(),
            },
            content: completion.content,
            model_used: completion.model_used,
            file_info: task.file_info.clone(),
        })
    }

    /// Cleanup in fixed order: scope, upload, slot, then the terminal state.
    async fn finalize(
        self: &Arc<Self>,
        id: TaskId,
        outcome: Outcome,
        scope: Option<ConfigurationScope>,
        permit: AdmissionPermit,
        done: CancellationToken,
    ) {
        if let Some(mut scope) = scope {
            scope.restore();
        }
        self.discard_upload(id).await;
        permit.release();

        let timeout_secs = self.settings.limits.task_timeout_secs;
        let (status, fields) = match outcome {
            Outcome::Completed(result) => (
                TaskStatus::Completed,
                TransitionFields {
                    message: Some("Processing completed".into()),
                    result: Some(result),
                    ..TransitionFields::default()
                },
            ),
            Outcome::Failed(failure) => (
                TaskStatus::Failed,
                TransitionFields::failed(failure.message, failure.error_type),
            ),
            Outcome::TimedOut => (
                TaskStatus::Failed,
                TransitionFields::failed(
                    format!("processing exceeded {timeout_secs}s timeout"),
                    ErrorType::TimeoutError,
                ),
            ),
            Outcome::Cancelled => (TaskStatus::Cancelled, TransitionFields::message("Task cancelled")),
        };

        match self.registry.transition(id, status, fields) {
            Ok(task) => match task.status {
                TaskStatus::Completed => info!(
                    task_id = %id,
                    model = task.model_used().unwrap_or_default(),
                    secs = task.processing_time().unwrap_or_default(),
                    "task completed"
                ),
                TaskStatus::Failed => warn!(
                    task_id = %id,
                    error_type = %task.error_type.map(|t| t.as_str()).unwrap_or_default(),
                    error = task.error.as_deref().unwrap_or_default(),
                    "task failed"
                ),
                _ => info!(task_id = %id, "task cancelled"),
            },
            Err(e) => error!(task_id = %id, error = %e, "failed to record terminal state"),
        }

        self.lock_running().remove(&id);
        self.promote_ready();
        done.cancel();
    }
}
