//! End-to-end scenarios for the orchestrator: admission, queueing,
//! cancellation, timeouts and cleanup, driven through scripted collaborators.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::Semaphore;

use docproc_core::config::{CircuitPolicy, LimitsConfig, MemoryConfig};
use docproc_core::{ErrorType, FileInfo};
use docproc_ingest::{ExtractOptions, ExtractionError, Extractor};
use docproc_llm::{Completion, GenerationParams, InvocationError, ModelCatalog, ModelInvoker};
use docproc_storage::{ObjectUploadStore, StorageError, UploadHandle, UploadStore};
use docproc_tasks::{
    AdmissionController, FixedMemoryProbe, Orchestrator, OrchestratorSettings, ParameterMap, ParameterStore,
    ProcessRequest, TaskError, TaskId, TaskStatus,
};

// ── Test doubles ─────────────────────────────────────────────

struct ScriptedExtractor {
    fail: bool,
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, bytes: Bytes, file: &FileInfo, _: &ExtractOptions) -> Result<String, ExtractionError> {
        if self.fail {
            return Err(ExtractionError::Empty(file.filename.clone()));
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Reply,
    TimeOut,
}

/// Blocks every generation until the test opens the gate.
struct GatedInvoker {
    gate: Semaphore,
    entered: AtomicUsize,
    behavior: Behavior,
    seen: Mutex<Vec<GenerationParams>>,
}

impl GatedInvoker {
    fn closed() -> Arc<Self> {
        Arc::new(Self::with(0, Behavior::Reply))
    }

    fn open() -> Arc<Self> {
        Arc::new(Self::with(Semaphore::MAX_PERMITS, Behavior::Reply))
    }

    fn with(permits: usize, behavior: Behavior) -> Self {
        Self {
            gate: Semaphore::new(permits),
            entered: AtomicUsize::new(0),
            behavior,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<GenerationParams> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelInvoker for GatedInvoker {
    async fn generate(&self, prompt: &str, text: &str, params: &GenerationParams) -> Result<Completion, InvocationError> {
        self.seen.lock().unwrap().push(params.clone());
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await.unwrap().forget();
        match self.behavior {
            Behavior::Reply => Ok(Completion {
                content: format!("{prompt}: {}", text.len()),
                model_used: params.model.clone().unwrap_or_else(|| "test-model".into()),
            }),
            Behavior::TimeOut => Err(InvocationError::Timeout),
        }
    }

    async fn catalog(&self) -> Result<ModelCatalog, InvocationError> {
        Ok(ModelCatalog::new(vec!["test-model".into()], "test-model"))
    }
}

/// Tracks which uploads are still stored.
struct TrackedUploads {
    inner: ObjectUploadStore,
    live: Mutex<HashSet<UploadHandle>>,
}

impl TrackedUploads {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: ObjectUploadStore::in_memory(),
            live: Mutex::new(HashSet::new()),
        })
    }

    fn live(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

#[async_trait]
impl UploadStore for TrackedUploads {
    async fn persist(&self, bytes: Bytes, file: &FileInfo) -> Result<UploadHandle, StorageError> {
        let handle = self.inner.persist(bytes, file).await?;
        self.live.lock().unwrap().insert(handle.clone());
        Ok(handle)
    }

    async fn read(&self, handle: &UploadHandle) -> Result<Bytes, StorageError> {
        self.inner.read(handle).await
    }

    async fn delete(&self, handle: &UploadHandle) -> Result<(), StorageError> {
        self.inner.delete(handle).await?;
        self.live.lock().unwrap().remove(handle);
        Ok(())
    }

    async fn health(&self) -> bool {
        true
    }
}

// ── Harness ──────────────────────────────────────────────────

struct Harness {
    orch: Arc<Orchestrator>,
    invoker: Arc<GatedInvoker>,
    uploads: Arc<TrackedUploads>,
    probe: Arc<FixedMemoryProbe>,
    base: ParameterMap,
}

struct Setup {
    capacity: usize,
    timeout_secs: u64,
    queue_max: usize,
    policy: CircuitPolicy,
    invoker: Arc<GatedInvoker>,
    extractor_fails: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            capacity: 2,
            timeout_secs: 300,
            queue_max: 100,
            policy: CircuitPolicy::Queue,
            invoker: GatedInvoker::closed(),
            extractor_fails: false,
        }
    }
}

impl Setup {
    fn build(self) -> Harness {
        let probe = Arc::new(FixedMemoryProbe::new(16 * 1024, 40.0));
        let admission = Arc::new(AdmissionController::with_capacity(
            probe.clone(),
            self.capacity,
            self.capacity,
            95.0,
        ));
        let settings = OrchestratorSettings {
            limits: LimitsConfig {
                task_timeout_secs: self.timeout_secs,
                queue_max_size: self.queue_max,
                rate_limit_per_hour: 0,
                ..LimitsConfig::default()
            },
            memory: MemoryConfig {
                circuit_policy: self.policy,
                ..MemoryConfig::default()
            },
            api_enabled: true,
        };
        let params = ParameterStore::from_config(&docproc_core::config::LlmConfig::default());
        let base = params.snapshot();
        let uploads = TrackedUploads::new();
        let orch = Orchestrator::with_admission(
            settings,
            params,
            Arc::new(ScriptedExtractor { fail: self.extractor_fails }),
            self.invoker.clone(),
            uploads.clone(),
            admission,
        );
        Harness {
            orch,
            invoker: self.invoker,
            uploads,
            probe,
            base,
        }
    }
}

fn request(owner: &str) -> ProcessRequest {
    request_with(owner, ParameterMap::new())
}

fn request_with(owner: &str, overrides: ParameterMap) -> ProcessRequest {
    let bytes = Bytes::from_static(b"quarterly revenue grew by twelve percent");
    ProcessRequest {
        owner: owner.into(),
        file: FileInfo::new("report.txt", bytes.len() as u64, "text/plain"),
        bytes,
        prompt: "Summarize the key figures".into(),
        overrides,
    }
}

impl Harness {
    async fn wait_for(&self, id: TaskId, status: TaskStatus) {
        let registry = self.orch.registry();
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.peek(id).map(|t| t.status) != Some(status) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "task {id} never reached {status}, is {:?}",
                registry.peek(id).map(|t| t.status)
            )
        });
    }

    async fn wait_entered(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.invoker.entered() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("invoker never reached");
    }

    fn status(&self, id: TaskId) -> TaskStatus {
        self.orch.registry().peek(id).unwrap().status
    }

    /// Nothing held: no slot, no upload, no parameter override.
    fn assert_clean(&self) {
        assert_eq!(self.orch.admission().active(), 0, "slots leaked");
        assert_eq!(self.uploads.live(), 0, "uploads leaked");
        assert_eq!(self.orch.held_uploads(), 0);
        assert_eq!(self.orch.parameters().snapshot(), self.base, "parameters not restored");
    }
}

fn assert_valid_path(history: &[TaskStatus]) {
    assert_eq!(history.first(), Some(&TaskStatus::Pending));
    for pair in history.windows(2) {
        assert!(pair[0].can_transition_to(pair[1]), "illegal step {} -> {}", pair[0], pair[1]);
    }
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn capacity_two_runs_two_and_queues_the_third() {
    let h = Setup::default().build();

    let a = h.orch.process(request("alice")).await.unwrap();
    let b = h.orch.process(request("alice")).await.unwrap();
    let c = h.orch.process(request("alice")).await.unwrap();

    assert_eq!(a.status, TaskStatus::Processing);
    assert_eq!(b.status, TaskStatus::Processing);
    assert_eq!(c.status, TaskStatus::Queued);
    assert_eq!(c.position, Some(0));
    assert_eq!(c.estimated_time, Some(60));
    assert_eq!(h.orch.admission().active(), 2);

    h.wait_entered(2).await;
    h.invoker.release(1);
    h.wait_for(c.task_id, TaskStatus::Processing).await;
    assert!(h.orch.admission().active() <= 2);

    h.invoker.release(2);
    for id in [a.task_id, b.task_id, c.task_id] {
        h.wait_for(id, TaskStatus::Completed).await;
        let task = h.orch.registry().peek(id).unwrap();
        assert_eq!(task.progress, 100.0);
        assert_valid_path(&task.history);
    }
    h.assert_clean();
}

#[tokio::test(start_paused = true)]
async fn deadline_fails_with_timeout_error_and_cleans_up() {
    let h = Setup {
        timeout_secs: 2,
        ..Setup::default()
    }
    .build();

    let overrides: ParameterMap = [("temperature".to_string(), json!(0.1))].into_iter().collect();
    let sub = h.orch.process(request_with("alice", overrides)).await.unwrap();
    h.wait_entered(1).await;
    assert_eq!(h.orch.parameters().get("temperature"), Some(json!(0.1)));

    h.wait_for(sub.task_id, TaskStatus::Failed).await;
    let task = h.orch.registry().peek(sub.task_id).unwrap();
    assert_eq!(task.error_type, Some(ErrorType::TimeoutError));
    assert!(task.progress < 100.0);
    assert!(task.completed_at.is_some());
    h.assert_clean();
}

#[tokio::test(start_paused = true)]
async fn timeout_wins_over_cancellation_in_the_same_tick() {
    let h = Setup {
        timeout_secs: 2,
        ..Setup::default()
    }
    .build();

    let overrides: ParameterMap = [("temperature".to_string(), json!(0.1))].into_iter().collect();
    let sub = h.orch.process(request_with("alice", overrides)).await.unwrap();
    h.wait_entered(1).await;

    // Poll the cancel once so the signal is sent, then reach the deadline
    // before the running task gets a chance to observe it.
    let cancel = h.orch.cancel(sub.task_id, "alice");
    tokio::pin!(cancel);
    tokio::select! {
        biased;
        _ = &mut cancel => panic!("cancel finished before the task was cleaned up"),
        _ = std::future::ready(()) => {}
    }
    tokio::time::advance(Duration::from_secs(2)).await;

    let task = cancel.await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_type, Some(ErrorType::TimeoutError));
    assert_eq!(
        task.history,
        vec![TaskStatus::Pending, TaskStatus::Processing, TaskStatus::Failed]
    );
    h.assert_clean();
}

#[tokio::test]
async fn model_timeout_maps_to_timeout_error() {
    let h = Setup {
        invoker: Arc::new(GatedInvoker::with(Semaphore::MAX_PERMITS, Behavior::TimeOut)),
        ..Setup::default()
    }
    .build();
    let sub = h.orch.process(request("alice")).await.unwrap();
    h.wait_for(sub.task_id, TaskStatus::Failed).await;
    let task = h.orch.registry().peek(sub.task_id).unwrap();
    assert_eq!(task.error_type, Some(ErrorType::TimeoutError));
    h.assert_clean();
}

#[tokio::test]
async fn extraction_failure_is_processing_error() {
    let h = Setup {
        invoker: GatedInvoker::open(),
        extractor_fails: true,
        ..Setup::default()
    }
    .build();
    let sub = h.orch.process(request("alice")).await.unwrap();
    h.wait_for(sub.task_id, TaskStatus::Failed).await;
    let task = h.orch.registry().peek(sub.task_id).unwrap();
    assert_eq!(task.error_type, Some(ErrorType::ProcessingError));
    assert!(task.error.unwrap().contains("text extraction failed"));
    assert_eq!(h.invoker.entered(), 0);
    h.assert_clean();
}

#[tokio::test]
async fn cancelling_a_queued_task_never_runs_it() {
    let h = Setup {
        capacity: 1,
        ..Setup::default()
    }
    .build();
    let a = h.orch.process(request("alice")).await.unwrap();
    let b = h.orch.process(request("alice")).await.unwrap();
    assert_eq!(b.status, TaskStatus::Queued);
    // `a` is past extraction, so only `b` still has an upload.
    h.wait_entered(1).await;
    assert_eq!(h.uploads.live(), 1);

    let cancelled = h.orch.cancel(b.task_id, "alice").await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(h.orch.queue().is_empty());
    assert_eq!(h.uploads.live(), 0);

    h.invoker.release(1);
    h.wait_for(a.task_id, TaskStatus::Completed).await;
    let b_task = h.orch.registry().peek(b.task_id).unwrap();
    assert_eq!(
        b_task.history,
        vec![TaskStatus::Pending, TaskStatus::Queued, TaskStatus::Cancelled]
    );
    assert!(b_task.started_at.is_none());
    h.assert_clean();
}

#[tokio::test]
async fn cancelling_a_running_task_restores_and_releases() {
    let h = Setup::default().build();
    let overrides: ParameterMap = [("max_tokens".to_string(), json!(64))].into_iter().collect();
    let sub = h.orch.process(request_with("alice", overrides)).await.unwrap();
    h.wait_entered(1).await;

    let task = h.orch.cancel(sub.task_id, "alice").await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.completed_at.is_some());
    h.assert_clean();

    let again = h.orch.cancel(sub.task_id, "alice").await.unwrap_err();
    assert!(matches!(again, TaskError::AlreadyTerminal { .. }));
    assert_eq!(again.error_type(), ErrorType::ValidationError);
}

#[tokio::test]
async fn high_memory_queues_under_queue_policy() {
    let h = Setup {
        invoker: GatedInvoker::open(),
        ..Setup::default()
    }
    .build();
    h.probe.set_used_percent(96.0);

    let sub = h.orch.process(request("alice")).await.unwrap();
    assert_eq!(sub.status, TaskStatus::Queued);
    assert_eq!(h.orch.promote_ready(), 0, "circuit open, nothing may start");

    h.probe.set_used_percent(50.0);
    assert_eq!(h.orch.promote_ready(), 1);
    h.wait_for(sub.task_id, TaskStatus::Completed).await;
    h.assert_clean();
}

#[tokio::test]
async fn high_memory_rejects_under_reject_policy() {
    let h = Setup {
        policy: CircuitPolicy::Reject,
        ..Setup::default()
    }
    .build();
    h.probe.set_used_percent(96.0);

    let err = h.orch.process(request("alice")).await.unwrap_err();
    assert!(matches!(err, TaskError::CircuitOpen { .. }));
    assert_eq!(err.error_type(), ErrorType::SystemError);
    assert!(h.orch.registry().is_empty(), "no task may be created");
    h.assert_clean();
}

#[tokio::test]
async fn queue_promotes_in_arrival_order() {
    let h = Setup {
        capacity: 1,
        ..Setup::default()
    }
    .build();
    let head = h.orch.process(request("alice")).await.unwrap();
    let mut waiting = Vec::new();
    for _ in 0..3 {
        waiting.push(h.orch.process(request("alice")).await.unwrap().task_id);
    }
    assert_eq!(h.orch.status(waiting[2], "alice").unwrap().position, Some(2));

    let mut previous = head.task_id;
    for (i, id) in waiting.iter().enumerate() {
        h.invoker.release(1);
        h.wait_for(previous, TaskStatus::Completed).await;
        h.wait_for(*id, TaskStatus::Processing).await;
        for later in &waiting[i + 1..] {
            assert_eq!(h.status(*later), TaskStatus::Queued);
        }
        previous = *id;
    }
    h.invoker.release(1);
    h.wait_for(previous, TaskStatus::Completed).await;
    h.assert_clean();
}

#[tokio::test]
async fn arrivals_do_not_overtake_waiting_tasks() {
    let h = Setup {
        capacity: 1,
        invoker: GatedInvoker::open(),
        ..Setup::default()
    }
    .build();
    h.probe.set_used_percent(97.0);
    let first = h.orch.process(request("alice")).await.unwrap();
    h.probe.set_used_percent(50.0);

    // A slot is free, but `first` is still waiting.
    let second = h.orch.process(request("alice")).await.unwrap();
    assert_eq!(second.status, TaskStatus::Queued);
    assert_eq!(second.position, Some(1));

    h.orch.promote_ready();
    assert_eq!(h.status(first.task_id), TaskStatus::Processing);
    h.wait_for(first.task_id, TaskStatus::Completed).await;
    h.wait_for(second.task_id, TaskStatus::Completed).await;
    h.assert_clean();
}

#[tokio::test]
async fn full_queue_rejects_without_creating_a_task() {
    let h = Setup {
        capacity: 1,
        queue_max: 1,
        ..Setup::default()
    }
    .build();
    h.orch.process(request("alice")).await.unwrap();
    h.orch.process(request("alice")).await.unwrap();

    let err = h.orch.process(request("alice")).await.unwrap_err();
    assert!(matches!(err, TaskError::QueueFull(1)));
    assert_eq!(h.orch.registry().len(), 2);
    assert_eq!(h.uploads.live(), 2);
}

#[tokio::test]
async fn progress_only_moves_forward() {
    let h = Setup::default().build();
    let sub = h.orch.process(request("alice")).await.unwrap();
    let mut samples = vec![h.orch.registry().peek(sub.task_id).unwrap().progress];

    h.wait_entered(1).await;
    samples.push(h.orch.registry().peek(sub.task_id).unwrap().progress);
    assert_eq!(samples[1], 60.0);

    h.invoker.release(1);
    h.wait_for(sub.task_id, TaskStatus::Completed).await;
    samples.push(h.orch.registry().peek(sub.task_id).unwrap().progress);

    assert!(samples.windows(2).all(|w| w[0] <= w[1]), "{samples:?}");
    assert_eq!(samples.last(), Some(&100.0));
}

#[tokio::test]
async fn each_task_sees_only_its_own_overrides() {
    let h = Setup::default().build();
    let hot: ParameterMap = [("temperature".to_string(), json!(1.5))].into_iter().collect();
    let a = h.orch.process(request_with("alice", hot)).await.unwrap();
    h.wait_entered(1).await;
    let b = h.orch.process(request("alice")).await.unwrap();
    h.wait_entered(2).await;

    let seen = h.invoker.seen();
    assert_eq!(seen[0].temperature, 1.5);
    assert_eq!(seen[1].temperature, 0.7);

    h.invoker.release(2);
    h.wait_for(a.task_id, TaskStatus::Completed).await;
    h.wait_for(b.task_id, TaskStatus::Completed).await;
    let result = h.orch.registry().peek(a.task_id).unwrap().result.unwrap();
    assert_eq!(result.processing_metadata.model_config.get("temperature"), Some(&json!(1.5)));
    h.assert_clean();
}

#[tokio::test(start_paused = true)]
async fn same_key_overrides_run_side_by_side() {
    let h = Setup {
        timeout_secs: 5,
        ..Setup::default()
    }
    .build();
    let cool: ParameterMap = [("temperature".to_string(), json!(0.1))].into_iter().collect();
    let warm: ParameterMap = [("temperature".to_string(), json!(0.2))].into_iter().collect();

    let a = h.orch.process(request_with("alice", cool)).await.unwrap();
    let b = h.orch.process(request_with("alice", warm)).await.unwrap();
    assert_eq!(h.orch.admission().active(), 2);

    // Both reach the model while the other still holds its override.
    h.wait_entered(2).await;
    let mut temps: Vec<f32> = h.invoker.seen().iter().map(|p| p.temperature).collect();
    temps.sort_by(f32::total_cmp);
    assert_eq!(temps, vec![0.1, 0.2]);
    assert_eq!(h.orch.parameters().active_scopes(), 2);

    h.invoker.release(2);
    h.wait_for(a.task_id, TaskStatus::Completed).await;
    h.wait_for(b.task_id, TaskStatus::Completed).await;
    assert_eq!(h.orch.parameters().active_scopes(), 0);
    h.assert_clean();
}

#[tokio::test]
async fn owners_are_isolated() {
    let h = Setup::default().build();
    let sub = h.orch.process(request("alice")).await.unwrap();

    assert!(matches!(h.orch.status(sub.task_id, "bob"), Err(TaskError::AccessDenied(_))));
    assert!(matches!(h.orch.cancel(sub.task_id, "bob").await, Err(TaskError::AccessDenied(_))));
    assert!(h.orch.list("bob").is_empty());
    assert_eq!(h.orch.list("alice").len(), 1);
    h.orch.shutdown();
}

#[tokio::test]
async fn invalid_requests_create_nothing() {
    let h = Setup::default().build();

    let mut short = request("alice");
    short.prompt = "  hi ".into();
    assert!(matches!(h.orch.process(short).await, Err(TaskError::Validation(_))));

    let mut exe = request("alice");
    exe.file = FileInfo::new("setup.exe", 10, "application/octet-stream");
    assert!(matches!(h.orch.process(exe).await, Err(TaskError::Validation(_))));

    let bad: ParameterMap = [("temperature".to_string(), json!(9.0))].into_iter().collect();
    assert!(matches!(
        h.orch.process(request_with("alice", bad)).await,
        Err(TaskError::Validation(_))
    ));

    assert!(h.orch.registry().is_empty());
    h.assert_clean();
}

#[tokio::test]
async fn shutdown_cancels_running_tasks() {
    let h = Setup::default().build();
    let handles = h.orch.spawn_background();
    let sub = h.orch.process(request("alice")).await.unwrap();
    h.wait_entered(1).await;

    h.orch.shutdown();
    h.wait_for(sub.task_id, TaskStatus::Cancelled).await;
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
    h.assert_clean();
}
