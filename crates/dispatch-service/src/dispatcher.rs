//! The composition root: admits submissions under a capacity bound, owns
//! every live task's record, and sequences components A through G.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dispatch_core::{
    CallbackDiagnostics, CallbackEnvelope, CallbackPayload, DispatchErrorKind, TaskRecord, TaskStatus, WorkspaceHandle,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::adapters::{CallbackEmitter, CallbackEmitterConfig, ExitReason, SensitiveGuard, StreamEvent, WorkerRunner};
use crate::domain::config::DispatchConfig;
use crate::domain::types::SubmitTaskRequest;
use crate::ports::callback_transport::CallbackTransport;
use crate::ports::token_provider::TokenProvider;
use crate::ports::workspace::WorkspaceManager;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Why a submission was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitRejection {
    /// `taskId` is currently live.
    Duplicate,
    /// `running == capacity` (or the dispatcher is draining).
    AtCapacity,
    /// Failed field-level validation.
    InvalidRequest(String),
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancellation was latched on a live task.
    Accepted,
    /// No task with that id is currently live.
    NotFound,
    /// The task had already reached a terminal state.
    AlreadyTerminal,
}

/// Cheap, read-only status for the health endpoint.
#[derive(Debug, Clone)]
pub struct DispatcherStatus {
    /// Configured concurrency bound.
    pub capacity: usize,
    /// Current count of tasks in `running`.
    pub running: usize,
    /// `capacity - running`.
    pub available: usize,
    /// Epoch seconds the held credential expires at, if one is held.
    pub token_expires_at: Option<u64>,
    /// Whether the dispatcher has latched a shutdown drain.
    pub draining: bool,
}

struct TaskHandle {
    record: tokio::sync::Mutex<TaskRecord>,
    cancellation: CancellationToken,
    /// Sequence counter for outbound callbacks. Kept as a lock-free atomic,
    /// separate from `TaskRecord::callback_cursor`, because the stream
    /// parser's per-line callback forwarding runs from a synchronous closure
    /// where taking the record's async mutex would risk blocking the runtime.
    cursor: AtomicU64,
}

impl TaskHandle {
    fn next_sequence(&self) -> u64 {
        self.cursor.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Admits submissions under a capacity bound and runs each task's full
/// pipeline on its own `tokio::spawn`ed future.
pub struct Dispatcher<W, T, C> {
    capacity: Arc<Semaphore>,
    capacity_size: usize,
    tasks: Arc<DashMap<String, Arc<TaskHandle>>>,
    draining: Arc<std::sync::atomic::AtomicBool>,
    workspace: Arc<W>,
    token_provider: Arc<T>,
    worker_runner: Arc<WorkerRunner>,
    sensitive_guard: Arc<SensitiveGuard>,
    callback_emitter: Arc<CallbackEmitter<C>>,
    default_worker_timeout: Duration,
    require_https_callbacks: bool,
}

impl<W, T, C> Dispatcher<W, T, C>
where
    W: WorkspaceManager + Send + Sync + 'static,
    T: TokenProvider + Send + Sync + 'static,
    C: CallbackTransport + Send + Sync + 'static,
{
    /// Build a dispatcher from its collaborators and the loaded config.
    pub fn new(config: &DispatchConfig, workspace: Arc<W>, token_provider: Arc<T>, callback_transport: Arc<C>) -> Self {
        Self {
            capacity: Arc::new(Semaphore::new(config.capacity.capacity)),
            capacity_size: config.capacity.capacity,
            tasks: Arc::new(DashMap::new()),
            draining: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            workspace,
            token_provider,
            worker_runner: Arc::new(WorkerRunner::new(config.capacity.worker_grace_window)),
            sensitive_guard: Arc::new(SensitiveGuard),
            callback_emitter: Arc::new(CallbackEmitter::new(
                callback_transport,
                CallbackEmitterConfig {
                    max_attempts_non_terminal: config.callback.max_attempts_non_terminal,
                    backoff_base: config.callback.backoff_base,
                    backoff_cap: config.callback.backoff_cap,
                },
            )),
            default_worker_timeout: config.capacity.worker_timeout,
            require_https_callbacks: config.http.require_https_callbacks,
        }
    }

    /// Latch the drain flag: `submit` starts returning `at_capacity`.
    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Whether every live task has reached a terminal state (used by the
    /// shutdown sequence to decide when it is safe to exit).
    pub fn is_drained(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cheap status snapshot for `GET /health`.
    pub async fn status(&self) -> DispatcherStatus {
        let running = self.capacity_size - self.capacity.available_permits();
        let token_expires_at = self.token_provider.current().await.ok().map(|t| t.expires_at());
        DispatcherStatus {
            capacity: self.capacity_size,
            running,
            available: self.capacity.available_permits(),
            token_expires_at,
            draining: self.draining.load(Ordering::SeqCst),
        }
    }

    /// Force a credential refresh, ahead of its natural expiry.
    pub async fn refresh_token(&self) -> Result<u64, crate::ports::token_provider::TokenError> {
        self.token_provider.refresh().await.map(|t| t.expires_at())
    }

    /// A read-only snapshot of a live task, if it exists.
    pub async fn lookup(&self, task_id: &str) -> Option<TaskRecord> {
        let handle = Arc::clone(self.tasks.get(task_id)?.value());
        Some(handle.record.lock().await.clone())
    }

    /// Latch cancellation on a live task. Idempotent.
    pub async fn cancel(&self, task_id: &str) -> CancelOutcome {
        let Some(entry) = self.tasks.get(task_id) else {
            return CancelOutcome::NotFound;
        };
        let handle = Arc::clone(entry.value());
        drop(entry);

        let mut record = handle.record.lock().await;
        if record.status.is_terminal() {
            return CancelOutcome::AlreadyTerminal;
        }
        record.request_cancellation();
        drop(record);

        handle.cancellation.cancel();
        CancelOutcome::Accepted
    }

    /// Admit `request` if capacity allows and `taskId` is not already live.
    pub fn submit(&self, request: SubmitTaskRequest) -> Result<(), SubmitRejection> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(SubmitRejection::AtCapacity);
        }
        if let Err(reason) = request.validate() {
            return Err(SubmitRejection::InvalidRequest(reason.to_string()));
        }
        if let Err(reason) = request.validate_callback_url(self.require_https_callbacks) {
            return Err(SubmitRejection::InvalidRequest(reason.to_string()));
        }

        let permit = match Arc::clone(&self.capacity).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(SubmitRejection::AtCapacity),
        };

        let record = TaskRecord::new(
            request.task_id.clone(),
            request.worker_type.clone(),
            request.prompt.clone(),
            request.callback_url.clone(),
            request.callback_secret.clone(),
            now_secs(),
        );
        let handle = Arc::new(TaskHandle {
            record: tokio::sync::Mutex::new(record),
            cancellation: CancellationToken::new(),
            cursor: AtomicU64::new(0),
        });

        match self.tasks.entry(request.task_id.clone()) {
            Entry::Occupied(_) => return Err(SubmitRejection::Duplicate),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&handle));
            }
        }

        let workspace = Arc::clone(&self.workspace);
        let token_provider = Arc::clone(&self.token_provider);
        let worker_runner = Arc::clone(&self.worker_runner);
        let sensitive_guard = Arc::clone(&self.sensitive_guard);
        let callback_emitter = Arc::clone(&self.callback_emitter);
        let tasks = Arc::clone(&self.tasks);
        let default_timeout = self.default_worker_timeout;
        let task_id = request.task_id.clone();
        let base_revision = request.base_revision.clone();
        let timeout = request.timeout_seconds.map(Duration::from_secs).unwrap_or(default_timeout);

        tokio::spawn(async move {
            let _permit = permit;
            run_pipeline(
                Arc::clone(&handle),
                request,
                base_revision,
                timeout,
                workspace,
                token_provider,
                worker_runner,
                sensitive_guard,
                callback_emitter,
            )
            .await;
            tasks.remove(&task_id);
        });

        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline<W, T, C>(
    handle: Arc<TaskHandle>,
    request: SubmitTaskRequest,
    base_revision: Option<String>,
    timeout: Duration,
    workspace: Arc<W>,
    token_provider: Arc<T>,
    worker_runner: Arc<WorkerRunner>,
    sensitive_guard: Arc<SensitiveGuard>,
    callback_emitter: Arc<CallbackEmitter<C>>,
) where
    W: WorkspaceManager + Send + Sync + 'static,
    T: TokenProvider + Send + Sync + 'static,
    C: CallbackTransport + Send + Sync + 'static,
{
    let task_id = request.task_id.clone();
    let outbox = callback_emitter.spawn_outbox(request.callback_url.clone(), request.callback_secret.clone());

    {
        let mut record = handle.record.lock().await;
        if !record.transition(TaskStatus::Running) {
            error!(task_id = %task_id, "illegal state transition to running");
            return;
        }
        record.started_at = Some(now_secs());
    }

    let workspace_handle = match workspace.allocate(&task_id, base_revision.as_deref()).await {
        Ok(workspace_handle) => workspace_handle,
        Err(e) => {
            error!(task_id = %task_id, error = %e, "workspace allocation failed");
            fail_task(&handle, &outbox, DispatchErrorKind::WorkspaceAllocationFailed.as_reason()).await;
            return;
        }
    };
    {
        let mut record = handle.record.lock().await;
        record.workspace_handle = Some(workspace_handle.clone());
    }

    if let Err(e) = workspace.clean(&workspace_handle).await {
        warn!(task_id = %task_id, error = %e, "initial workspace clean failed");
    }

    let token = match token_provider.current().await {
        Ok(token) => token,
        Err(e) => {
            error!(task_id = %task_id, error = %e, "token unavailable");
            dispose(&workspace, &workspace_handle).await;
            fail_task(&handle, &outbox, DispatchErrorKind::TokenUnavailable.as_reason()).await;
            return;
        }
    };

    let workspace_path = workspace.path_of(&workspace_handle);
    let cancellation = handle.cancellation.clone();
    let outbox_events = outbox.clone();
    let task_id_for_events = task_id.clone();
    let handle_for_events = Arc::clone(&handle);

    let exit_reason = worker_runner
        .run(
            &request.worker_type,
            &workspace_path,
            &request.prompt,
            token.value(),
            timeout,
            cancellation,
            move |event| {
                let outbox_events = outbox_events.clone();
                let task_id_for_events = task_id_for_events.clone();
                let handle_for_events = Arc::clone(&handle_for_events);
                async move {
                    if let Some(envelope) = stream_event_to_envelope(&task_id_for_events, &handle_for_events, &event) {
                        // Blocking send: a full outbox back-pressures this
                        // await, which stalls the read loop above and, in
                        // turn, the worker's own stdout writes.
                        if outbox_events.send(envelope).await.is_err() {
                            warn!(task_id = %task_id_for_events, "callback outbox closed while forwarding a progress event");
                        }
                    }
                }
            },
        )
        .await;

    match exit_reason {
        ExitReason::Succeeded => match sensitive_guard.guard(&workspace_path, 1).await {
            Ok(outcome) if outcome.all_sensitive => {
                complete_cancelled(&handle, &outbox, Some("all_changes_sensitive".to_string())).await;
            }
            Ok(outcome) => {
                let diagnostics = if outcome.remaining.is_empty() {
                    None
                } else {
                    Some(CallbackDiagnostics {
                        revert_failures: outcome.remaining,
                    })
                };
                complete_task(&handle, &outbox, outcome.reverted, diagnostics).await;
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "sensitive-file guard failed");
                fail_task(&handle, &outbox, DispatchErrorKind::SensitiveRevertPartial.as_reason()).await;
            }
        },
        ExitReason::ParserFailed(code) => fail_task(&handle, &outbox, &code).await,
        ExitReason::SilentExit => fail_task(&handle, &outbox, DispatchErrorKind::WorkerSilentExit.as_reason()).await,
        ExitReason::NonZeroExit(_) => fail_task(&handle, &outbox, DispatchErrorKind::WorkerFailed.as_reason()).await,
        ExitReason::TimedOut => fail_task(&handle, &outbox, DispatchErrorKind::WorkerTimeout.as_reason()).await,
        ExitReason::Cancelled => complete_cancelled(&handle, &outbox, None).await,
    }

    dispose(&workspace, &workspace_handle).await;
}

fn stream_event_to_envelope(task_id: &str, handle: &Arc<TaskHandle>, event: &StreamEvent) -> Option<CallbackEnvelope> {
    let payload = match event {
        StreamEvent::Started => CallbackPayload::Started,
        StreamEvent::Progress(text) => CallbackPayload::Progress {
            progress_text: text.clone(),
        },
        // Terminal parser markers are resolved into Completed/Failed by the
        // pipeline after the guard runs; they never reach the wire directly.
        StreamEvent::Succeeded | StreamEvent::Failed(_) => return None,
    };
    Some(CallbackEnvelope::new(task_id, handle.next_sequence(), now_secs(), payload))
}

async fn fail_task(handle: &Arc<TaskHandle>, outbox: &mpsc::Sender<CallbackEnvelope>, code: &str) {
    let mut record = handle.record.lock().await;
    if !record.transition(TaskStatus::Failed) {
        return;
    }
    record.ended_at = Some(now_secs());
    let task_id = record.task_id.clone();
    drop(record);

    let envelope = CallbackEnvelope::new(
        task_id,
        handle.next_sequence(),
        now_secs(),
        CallbackPayload::Failed {
            error_code: code.to_string(),
        },
    );
    let _ = outbox.send(envelope).await;
}

async fn complete_task(
    handle: &Arc<TaskHandle>,
    outbox: &mpsc::Sender<CallbackEnvelope>,
    reverted_files: Vec<String>,
    diagnostics: Option<CallbackDiagnostics>,
) {
    let mut record = handle.record.lock().await;
    if !record.transition(TaskStatus::Completed) {
        return;
    }
    record.ended_at = Some(now_secs());
    let task_id = record.task_id.clone();
    drop(record);

    let envelope = CallbackEnvelope::new(
        task_id,
        handle.next_sequence(),
        now_secs(),
        CallbackPayload::Completed {
            result_ref: None,
            reverted_files,
            diagnostics,
        },
    );
    let _ = outbox.send(envelope).await;
}

async fn complete_cancelled(handle: &Arc<TaskHandle>, outbox: &mpsc::Sender<CallbackEnvelope>, reason: Option<String>) {
    let mut record = handle.record.lock().await;
    if !record.transition(TaskStatus::Cancelled) {
        return;
    }
    record.ended_at = Some(now_secs());
    let task_id = record.task_id.clone();
    drop(record);

    let envelope = CallbackEnvelope::new(task_id, handle.next_sequence(), now_secs(), CallbackPayload::Cancelled { reason });
    let _ = outbox.send(envelope).await;
}

async fn dispose<W: WorkspaceManager>(workspace: &Arc<W>, handle: &WorkspaceHandle) {
    if let Err(e) = workspace.dispose(handle).await {
        warn!(workspace = %handle.as_str(), error = %e, "workspace disposal failed, leaking until process exit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SubmitTaskRequest;
    use crate::adapters::token_provider::StaticTokenProvider;
    use crate::ports::callback_transport::DeliveryOutcome;
    use crate::ports::token_provider::Token;
    use crate::ports::workspace::WorkspaceError;
    use async_trait::async_trait;

    #[test]
    fn submit_rejections_are_distinguishable() {
        assert_ne!(SubmitRejection::Duplicate, SubmitRejection::AtCapacity);
    }

    #[test]
    fn task_handle_sequence_numbers_start_at_one() {
        let handle = TaskHandle {
            record: tokio::sync::Mutex::new(TaskRecord::new("t", "w", "p", "https://cb.test", "s".repeat(32), 0)),
            cancellation: CancellationToken::new(),
            cursor: AtomicU64::new(0),
        };
        assert_eq!(handle.next_sequence(), 1);
        assert_eq!(handle.next_sequence(), 2);
    }

    /// Never actually allocates anything; every pipeline spawned in these
    /// tests dies at the first await point, which is exactly what we want
    /// since these tests only exercise `submit`'s synchronous admission path.
    struct DeadWorkspace;

    #[async_trait]
    impl WorkspaceManager for DeadWorkspace {
        async fn allocate(&self, _task_id: &str, _base_revision: Option<&str>) -> Result<WorkspaceHandle, WorkspaceError> {
            Err(WorkspaceError::AllocationFailed("test double never allocates".into()))
        }

        async fn clean(&self, _handle: &WorkspaceHandle) -> Result<(), WorkspaceError> {
            Ok(())
        }

        async fn dispose(&self, _handle: &WorkspaceHandle) -> Result<(), WorkspaceError> {
            Ok(())
        }

        fn path_of(&self, _handle: &WorkspaceHandle) -> std::path::PathBuf {
            std::path::PathBuf::from("/tmp/unused")
        }
    }

    struct NullCallbackTransport;

    #[async_trait]
    impl CallbackTransport for NullCallbackTransport {
        async fn deliver(&self, _url: &str, _body: &str, _timestamp: &str, _signature: &str) -> DeliveryOutcome {
            DeliveryOutcome::Accepted
        }
    }

    fn test_dispatcher(capacity: usize) -> Dispatcher<DeadWorkspace, StaticTokenProvider, NullCallbackTransport> {
        let mut config = DispatchConfig::default();
        config.capacity.capacity = capacity;
        config.security.shared_secret = "s".repeat(32);
        Dispatcher::new(
            &config,
            Arc::new(DeadWorkspace),
            Arc::new(StaticTokenProvider::new(Token::new("fixed", u64::MAX))),
            Arc::new(NullCallbackTransport),
        )
    }

    fn test_request(task_id: &str) -> SubmitTaskRequest {
        SubmitTaskRequest {
            task_id: task_id.to_string(),
            worker_type: "echo".to_string(),
            prompt: "hello".to_string(),
            callback_url: "https://cb.test/hook".to_string(),
            callback_secret: "s".repeat(32),
            base_revision: None,
            timeout_seconds: Some(60),
        }
    }

    #[tokio::test]
    async fn submit_admits_up_to_capacity_then_rejects() {
        let dispatcher = test_dispatcher(1);
        assert!(dispatcher.submit(test_request("t-1")).is_ok());
        assert_eq!(dispatcher.submit(test_request("t-2")), Err(SubmitRejection::AtCapacity));
    }

    #[tokio::test]
    async fn submit_rejects_a_duplicate_task_id_before_the_pipeline_runs() {
        let dispatcher = test_dispatcher(4);
        assert!(dispatcher.submit(test_request("t-1")).is_ok());
        assert_eq!(dispatcher.submit(test_request("t-1")), Err(SubmitRejection::Duplicate));
    }

    #[tokio::test]
    async fn submit_rejects_invalid_requests_before_touching_capacity() {
        let dispatcher = test_dispatcher(1);
        let mut request = test_request("t-1");
        request.callback_secret = "short".to_string();
        assert!(matches!(dispatcher.submit(request), Err(SubmitRejection::InvalidRequest(_))));
        // Capacity was never consumed by the rejected submission.
        assert!(dispatcher.submit(test_request("t-2")).is_ok());
    }

    #[tokio::test]
    async fn submit_rejects_everything_while_draining() {
        let dispatcher = test_dispatcher(4);
        dispatcher.begin_draining();
        assert_eq!(dispatcher.submit(test_request("t-1")), Err(SubmitRejection::AtCapacity));
    }

    #[tokio::test]
    async fn a_failed_pipeline_releases_its_capacity_permit() {
        let dispatcher = test_dispatcher(1);
        dispatcher.submit(test_request("t-1")).unwrap();
        // DeadWorkspace fails allocation immediately; give the spawned
        // pipeline a chance to run to completion and drop its permit.
        for _ in 0..50 {
            if dispatcher.submit(test_request("t-2")).is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("capacity was never released after the pipeline failed");
    }
}
