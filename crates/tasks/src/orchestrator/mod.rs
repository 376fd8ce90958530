//! The orchestrator ties admission, queueing and execution together.
//!
//! Every decision that changes which tasks hold a slot or sit in the queue
//! (submission, promotion, cancellation of waiting tasks) happens under one
//! short synchronous gate, so the queue and the admission count are always
//! observed together. Nothing awaits while the gate is held.

mod background;
mod execution;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docproc_core::config::{CircuitPolicy, LimitsConfig, MemoryConfig};
use docproc_core::Config;
use docproc_ingest::Extractor;
use docproc_llm::{InvocationError, ModelCatalog, ModelInvoker};
use docproc_storage::{UploadHandle, UploadStore};

use crate::admission::{circuit_open, AdmissionController, AdmissionPermit};
use crate::error::TaskError;
use crate::health::{evaluate, HealthInputs, HealthReport};
use crate::memory::MemoryProbe;
use crate::queue::TaskQueue;
use crate::rate_limit::RateLimiter;
use crate::registry::{TaskRegistry, TransitionFields};
use crate::scope::ParameterStore;
use crate::types::{
    ProcessRequest, Submission, Task, TaskId, TaskStatus, TaskView, SECONDS_PER_QUEUED_TASK,
};
use crate::validation::{validate_file, validate_overrides, validate_prompt};

/// How long `cancel` waits for a running task to finish cleanup.
const CANCEL_WAIT: Duration = Duration::from_secs(10);

/// Upper bound on a single dependency health probe.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub limits: LimitsConfig,
    pub memory: MemoryConfig,
    pub api_enabled: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            limits: config.limits.clone(),
            memory: config.memory.clone(),
            api_enabled: config.server.api_enabled,
        }
    }

    fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.task_timeout_secs)
    }
}

/// The external services a task depends on.
pub struct Collaborators {
    pub extractor: Arc<dyn Extractor>,
    pub invoker: Arc<dyn ModelInvoker>,
    pub uploads: Arc<dyn UploadStore>,
    pub memory_probe: Arc<dyn MemoryProbe>,
}

/// Public view of the processing limits.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigView {
    pub enabled: bool,
    /// Bytes.
    pub max_file_size: u64,
    pub max_concurrent: usize,
    /// Seconds.
    pub timeout: u64,
    pub supported_formats: Vec<String>,
    pub queue_max_size: usize,
    pub circuit_policy: CircuitPolicy,
    pub features: BTreeMap<String, bool>,
}

/// Signals for one running task.
#[derive(Clone)]
struct RunningTask {
    cancel: CancellationToken,
    /// Cancelled once the task has reached its terminal state.
    done: CancellationToken,
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    registry: TaskRegistry,
    queue: TaskQueue,
    admission: Arc<AdmissionController>,
    params: Arc<ParameterStore>,
    rate_limiter: RateLimiter,
    extractor: Arc<dyn Extractor>,
    invoker: Arc<dyn ModelInvoker>,
    uploads: Arc<dyn UploadStore>,
    upload_handles: Mutex<HashMap<TaskId, UploadHandle>>,
    running: Mutex<HashMap<TaskId, RunningTask>>,
    gate: Mutex<()>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(settings: OrchestratorSettings, params: ParameterStore, collaborators: Collaborators) -> Arc<Self> {
        let admission = Arc::new(AdmissionController::new(
            collaborators.memory_probe,
            settings.memory.per_task_mb,
            settings.limits.max_concurrent_tasks,
            settings.memory.emergency_stop_threshold,
        ));
        Self::with_admission(settings, params, collaborators.extractor, collaborators.invoker, collaborators.uploads, admission)
    }

    /// Build with an explicit admission controller.
    pub fn with_admission(
        settings: OrchestratorSettings,
        params: ParameterStore,
        extractor: Arc<dyn Extractor>,
        invoker: Arc<dyn ModelInvoker>,
        uploads: Arc<dyn UploadStore>,
        admission: Arc<AdmissionController>,
    ) -> Arc<Self> {
        info!(
            capacity = admission.capacity(),
            ceiling = admission.ceiling(),
            threshold = admission.threshold(),
            queue_max = settings.limits.queue_max_size,
            timeout_secs = settings.limits.task_timeout_secs,
            "orchestrator ready"
        );
        Arc::new(Self {
            queue: TaskQueue::new(settings.limits.queue_max_size),
            rate_limiter: RateLimiter::new(settings.limits.rate_limit_per_hour),
            registry: TaskRegistry::new(),
            params: Arc::new(params),
            admission,
            extractor,
            invoker,
            uploads,
            upload_handles: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            gate: Mutex::new(()),
            shutdown: CancellationToken::new(),
            settings,
        })
    }

    /// Build from full config with the given collaborators.
    pub fn from_config(config: &Config, collaborators: Collaborators) -> Arc<Self> {
        Self::new(
            OrchestratorSettings::from_config(config),
            ParameterStore::from_config(&config.llm),
            collaborators,
        )
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    // ── Submission ────────────────────────────────────────────

    /// Accept a request, then start it or queue it.
    ///
    /// Validation, rate limiting and the reject-policy circuit check all
    /// happen before any task or upload exists.
    pub async fn process(self: &Arc<Self>, request: ProcessRequest) -> Result<Submission, TaskError> {
        if !self.settings.api_enabled {
            return Err(TaskError::Disabled);
        }
        let limits = &self.settings.limits;
        validate_file(&request.file, limits)?;
        let prompt = validate_prompt(&request.prompt, limits)?;
        validate_overrides(&request.overrides)?;
        self.rate_limiter.check(&request.owner)?;

        if self.settings.memory.circuit_policy == CircuitPolicy::Reject {
            let used_percent = self.admission.memory().used_percent;
            if circuit_open(used_percent, self.admission.threshold()) {
                warn!(owner = %request.owner, used_percent, "rejecting request, memory circuit open");
                return Err(TaskError::CircuitOpen { used_percent });
            }
        }
        if self.queue.is_full() && !self.admission.has_free_slot() {
            return Err(TaskError::QueueFull(self.queue.len()));
        }

        let handle = self.uploads.persist(request.bytes.clone(), &request.file).await?;

        match self.admit(&request, &prompt, handle.clone()) {
            Ok(submission) => Ok(submission),
            Err(err) => {
                if let Err(e) = self.uploads.delete(&handle).await {
                    warn!(handle = %handle, error = %e, "failed to delete rejected upload");
                }
                Err(err)
            }
        }
    }

    /// Create the task and place it, all under the gate.
    fn admit(self: &Arc<Self>, request: &ProcessRequest, prompt: &str, handle: UploadHandle) -> Result<Submission, TaskError> {
        let _gate = self.lock_gate();

        // Arrivals never overtake tasks that are already waiting.
        let permit = if self.queue.is_empty() {
            self.admission.try_acquire().ok()
        } else {
            None
        };
        if permit.is_none() && self.queue.is_full() {
            warn!(owner = %request.owner, queued = self.queue.len(), "queue full, rejecting request");
            return Err(TaskError::QueueFull(self.queue.len()));
        }

        let task = self
            .registry
            .create(&request.owner, prompt, request.file.clone(), request.overrides.clone());
        self.lock_uploads().insert(task.id, handle);
        let config_applied = self.params.effective_for(&request.overrides);

        match permit {
            Some(permit) => {
                self.start(task.id, permit)?;
                info!(task_id = %task.id, owner = %task.owner, file = %task.file_info.filename, "task started");
                Ok(Submission {
                    task_id: task.id,
                    status: TaskStatus::Processing,
                    message: "Document processing started".into(),
                    position: None,
                    estimated_time: None,
                    config_applied,
                    created_at: task.created_at,
                })
            }
            None => {
                let position = self.queue.enqueue(task.id)?;
                self.registry.transition(
                    task.id,
                    TaskStatus::Queued,
                    TransitionFields::message(format!("Queued at position {}", position + 1)),
                )?;
                info!(task_id = %task.id, owner = %task.owner, position, "task queued");
                Ok(Submission {
                    task_id: task.id,
                    status: TaskStatus::Queued,
                    message: "Task queued for processing".into(),
                    position: Some(position),
                    estimated_time: Some((position as u64 + 1) * SECONDS_PER_QUEUED_TASK),
                    config_applied,
                    created_at: task.created_at,
                })
            }
        }
    }

    /// Move an admitted task to `processing` and spawn its execution.
    /// Caller holds the gate.
    fn start(self: &Arc<Self>, id: TaskId, permit: AdmissionPermit) -> Result<(), TaskError> {
        let timeout = self.settings.task_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let wall_deadline = Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(1));

        self.registry.transition(
            id,
            TaskStatus::Processing,
            TransitionFields {
                message: Some("Processing started".into()),
                deadline: Some(wall_deadline),
                memory_usage_mb: Some(self.settings.memory.per_task_mb),
                ..TransitionFields::default()
            },
        )?;
        self.registry.set_progress(id, 10.0, None);

        let signals = RunningTask {
            cancel: self.shutdown.child_token(),
            done: CancellationToken::new(),
        };
        self.lock_running().insert(id, signals.clone());

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(id, permit, signals.cancel, signals.done, deadline).await });
        Ok(())
    }

    /// Start queued tasks from the head while slots are free.
    pub fn promote_ready(self: &Arc<Self>) -> usize {
        let _gate = self.lock_gate();
        let mut promoted = 0;
        while self.queue.peek().is_some() {
            let Ok(permit) = self.admission.try_acquire() else {
                break;
            };
            let Some(id) = self.queue.promote_next() else {
                break;
            };
            match self.start(id, permit) {
                Ok(()) => {
                    info!(task_id = %id, queued = self.queue.len(), "task promoted from queue");
                    promoted += 1;
                }
                Err(e) => {
                    warn!(task_id = %id, error = %e, "failed to start queued task");
                    self.spawn_discard_upload(id);
                }
            }
        }
        promoted
    }

    // ── Cancellation ──────────────────────────────────────────

    /// Cancel a task owned by `owner`. Returns the task after cancellation.
    ///
    /// Waiting tasks are cancelled immediately. Running tasks are signalled
    /// and this waits (bounded) until their cleanup has finished.
    pub async fn cancel(&self, id: TaskId, owner: &str) -> Result<Task, TaskError> {
        self.registry.get(id, owner)?;

        let running = {
            let _gate = self.lock_gate();
            let task = self.registry.get(id, owner)?;
            match task.status {
                status if status.is_terminal() => {
                    return Err(TaskError::AlreadyTerminal { id, status });
                }
                TaskStatus::Pending | TaskStatus::Queued => {
                    self.queue.remove(id);
                    self.registry
                        .transition(id, TaskStatus::Cancelled, TransitionFields::message("Task cancelled by user"))?;
                    None
                }
                _ => {
                    let signals = self.lock_running().get(&id).cloned();
                    if let Some(signals) = &signals {
                        signals.cancel.cancel();
                    }
                    Some(signals)
                }
            }
        };

        match running {
            None => {
                self.discard_upload(id).await;
                info!(task_id = %id, "waiting task cancelled");
            }
            Some(Some(signals)) => {
                info!(task_id = %id, "cancellation requested for running task");
                if tokio::time::timeout(CANCEL_WAIT, signals.done.cancelled()).await.is_err() {
                    warn!(task_id = %id, "cancelled task did not finish cleanup in time");
                }
            }
            // Processing without signals only happens mid-finalize.
            Some(None) => {}
        }
        self.registry.get(id, owner)
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status(&self, id: TaskId, owner: &str) -> Result<TaskView, TaskError> {
        let task = self.registry.get(id, owner)?;
        Ok(self.view(task))
    }

    /// The owner's tasks, newest first.
    pub fn list(&self, owner: &str) -> Vec<TaskView> {
        self.registry.list(owner).into_iter().map(|t| self.view(t)).collect()
    }

    fn view(&self, task: Task) -> TaskView {
        let position = match task.status {
            TaskStatus::Queued => self.queue.position_of(task.id),
            _ => None,
        };
        TaskView {
            processing_time: task.processing_time(),
            position,
            task,
        }
    }

    pub async fn health(&self) -> HealthReport {
        let model_probe = tokio::time::timeout(HEALTH_PROBE_TIMEOUT, self.invoker.health());
        let storage_probe = tokio::time::timeout(HEALTH_PROBE_TIMEOUT, self.uploads.health());
        let (model_up, storage_up) = tokio::join!(model_probe, storage_probe);
        let model_up = model_up.unwrap_or(false);
        let storage_up = storage_up.unwrap_or(false);

        let memory = self.admission.memory();
        let open = circuit_open(memory.used_percent, self.admission.threshold());
        let queue_length = self.queue.len();
        let status = evaluate(&HealthInputs {
            api_enabled: self.settings.api_enabled,
            circuit_open: open,
            circuit_policy: self.settings.memory.circuit_policy,
            has_free_slot: self.admission.has_free_slot(),
            queue_full: self.queue.is_full(),
            capacity: self.admission.capacity(),
            ceiling: self.admission.ceiling(),
            dependencies_up: model_up && storage_up,
        });

        let up_down = |up: bool| (if up { "up" } else { "down" }).to_string();
        let mut services = BTreeMap::new();
        services.insert("model_backend".to_string(), up_down(model_up));
        services.insert("storage".to_string(), up_down(storage_up));
        services.insert("admission".to_string(), up_down(!open));

        HealthReport {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            active_tasks: self.admission.active(),
            queue_length,
            capacity: self.admission.capacity(),
            memory_usage: memory,
            circuit_open: open,
            services,
            tasks: self.registry.counts(),
        }
    }

    pub fn config_view(&self) -> ConfigView {
        let limits = &self.settings.limits;
        let features = [
            ("background_processing", true),
            ("queue_management", true),
            ("memory_management", true),
            ("rate_limiting", limits.rate_limit_per_hour > 0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        ConfigView {
            enabled: self.settings.api_enabled,
            max_file_size: limits.max_file_size_bytes(),
            max_concurrent: self.admission.capacity(),
            timeout: limits.task_timeout_secs,
            supported_formats: limits.supported_formats.clone(),
            queue_max_size: limits.queue_max_size,
            circuit_policy: self.settings.memory.circuit_policy,
            features,
        }
    }

    pub async fn catalog(&self) -> Result<ModelCatalog, InvocationError> {
        self.invoker.catalog().await
    }

    /// Stop background loops and cancel running tasks.
    pub fn shutdown(&self) {
        info!(running = self.lock_running().len(), queued = self.queue.len(), "orchestrator shutting down");
        self.shutdown.cancel();
    }

    // ── Uploads ───────────────────────────────────────────────

    fn upload_handle(&self, id: TaskId) -> Option<UploadHandle> {
        self.lock_uploads().get(&id).cloned()
    }

    /// Delete a task's upload if it is still held. Safe to call repeatedly.
    ///
    /// The handle is forgotten only after the delete returns, so an
    /// interrupted call leaves it for the next one.
    async fn discard_upload(&self, id: TaskId) {
        let Some(handle) = self.upload_handle(id) else {
            return;
        };
        if let Err(e) = self.uploads.delete(&handle).await {
            warn!(task_id = %id, handle = %handle, error = %e, "failed to delete upload");
        }
        self.lock_uploads().remove(&id);
    }

    /// Number of uploads still held for unfinished tasks.
    pub fn held_uploads(&self) -> usize {
        self.lock_uploads().len()
    }

    fn spawn_discard_upload(self: &Arc<Self>, id: TaskId) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.discard_upload(id).await });
    }

    // ── Locks ─────────────────────────────────────────────────

    fn lock_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_running(&self) -> MutexGuard<'_, HashMap<TaskId, RunningTask>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_uploads(&self) -> MutexGuard<'_, HashMap<TaskId, UploadHandle>> {
        self.upload_handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}
