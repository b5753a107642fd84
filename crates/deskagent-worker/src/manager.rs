//! The worker manager: creates/terminates workers, routes round-trips,
//! fans out config changes, and caches per-session task state so tab
//! switches never need a worker round trip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use deskagent_core::{
    ApprovalOutcome, EndpointConfig, Message, SessionEvent, TodoItem, UiEvent,
};
use deskagent_llm::ChatClient;
use deskagent_loop::{AgentRunConfig, AgentRunResult};

use crate::host::{spawn_worker_with_client, WorkerSettings};
use crate::protocol::{CompactContext, CompactReply, MainToWorker, WorkerToMain};

/// Hard cap on concurrently open sessions.
pub const MAX_WORKERS: usize = 8;

const READY_TIMEOUT: Duration = Duration::from_secs(10);
const TERMINATE_DRAIN: Duration = Duration::from_millis(500);
const COMPACT_TIMEOUT: Duration = Duration::from_secs(60);

/// Where enriched broadcasts go. Every listener receives every event and
/// filters by channel + session id.
pub trait UiSink: Send + Sync {
    fn deliver(&self, event: SessionEvent);
    fn show_task_window(&self, _session_id: &str) {}
    fn flash_windows(&self) {}
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("worker limit reached ({0})")]
    WorkerLimit(usize),

    #[error("session already exists: {0}")]
    SessionExists(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session is already running: {0}")]
    AlreadyRunning(String),

    #[error("worker did not become ready in time")]
    ReadyTimeout,

    #[error("worker crashed")]
    WorkerCrashed,

    #[error("worker terminated")]
    Terminated,

    #[error("worker channel closed")]
    ChannelClosed,

    #[error("compaction timed out")]
    CompactTimeout,
}

/// Cached task window state for one session.
#[derive(Debug, Clone, Default)]
pub struct CachedTask {
    pub todos: Vec<TodoItem>,
    pub title: Option<String>,
}

type RunResolver = oneshot::Sender<Result<AgentRunResult, ManagerError>>;

struct WorkerEntry {
    commands: mpsc::Sender<MainToWorker>,
    running: Arc<AtomicBool>,
    terminating: Arc<AtomicBool>,
    pending_run: Arc<Mutex<Option<RunResolver>>>,
    pending_compact: Arc<Mutex<Option<oneshot::Sender<CompactReply>>>>,
    /// Request ids of approval/ask modals currently shown by the UI.
    pending_requests: Arc<DashSet<String>>,
    host: JoinHandle<()>,
    relay: JoinHandle<()>,
}

pub struct WorkerManager {
    workers: DashMap<String, WorkerEntry>,
    task_cache: Arc<DashMap<String, CachedTask>>,
    sink: Arc<dyn UiSink>,
}

impl WorkerManager {
    pub fn new(sink: Arc<dyn UiSink>) -> Self {
        Self {
            workers: DashMap::new(),
            task_cache: Arc::new(DashMap::new()),
            sink,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.workers
            .get(session_id)
            .map(|entry| entry.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Cached TODOs + title, for instant task-window restore on tab switch.
    pub fn cached_task(&self, session_id: &str) -> Option<CachedTask> {
        self.task_cache.get(session_id).map(|entry| entry.clone())
    }

    /// Create a worker for a new session and wait for its ready handshake.
    pub async fn create_worker(
        &self,
        session_id: impl Into<String>,
        enabled_groups: Vec<String>,
        settings: WorkerSettings,
    ) -> Result<(), ManagerError> {
        self.create_worker_with_client(session_id, enabled_groups, settings, None)
            .await
    }

    pub async fn create_worker_with_client(
        &self,
        session_id: impl Into<String>,
        enabled_groups: Vec<String>,
        settings: WorkerSettings,
        client_override: Option<Arc<dyn ChatClient>>,
    ) -> Result<(), ManagerError> {
        let session_id = session_id.into();

        if self.workers.contains_key(&session_id) {
            return Err(ManagerError::SessionExists(session_id));
        }
        if self.workers.len() >= MAX_WORKERS {
            return Err(ManagerError::WorkerLimit(MAX_WORKERS));
        }

        let mut handle = spawn_worker_with_client(
            session_id.clone(),
            enabled_groups,
            settings,
            client_override,
        );

        // Ready handshake before the worker accepts any run.
        match tokio::time::timeout(READY_TIMEOUT, handle.events.recv()).await {
            Ok(Some(WorkerToMain::Ready)) => {}
            _ => {
                handle.join.abort();
                return Err(ManagerError::ReadyTimeout);
            }
        }

        let running = Arc::new(AtomicBool::new(false));
        let terminating = Arc::new(AtomicBool::new(false));
        let pending_run: Arc<Mutex<Option<RunResolver>>> = Arc::new(Mutex::new(None));
        let pending_compact = Arc::new(Mutex::new(None));
        let pending_requests = Arc::new(DashSet::new());

        let relay = tokio::spawn(relay_loop(RelayContext {
            session_id: session_id.clone(),
            events: handle.events,
            sink: Arc::clone(&self.sink),
            running: Arc::clone(&running),
            terminating: Arc::clone(&terminating),
            pending_run: Arc::clone(&pending_run),
            pending_compact: Arc::clone(&pending_compact),
            pending_requests: Arc::clone(&pending_requests),
            task_cache: Arc::clone(&self.task_cache),
        }));

        self.workers.insert(
            session_id,
            WorkerEntry {
                commands: handle.commands,
                running,
                terminating,
                pending_run,
                pending_compact,
                pending_requests,
                host: handle.join,
                relay,
            },
        );

        Ok(())
    }

    /// Start a run and wait for its result. Rejected while one is running.
    pub async fn run(
        &self,
        session_id: &str,
        user_message: impl Into<String>,
        existing_messages: Vec<Message>,
        config: AgentRunConfig,
    ) -> Result<AgentRunResult, ManagerError> {
        let (commands, receiver) = {
            let entry = self
                .workers
                .get(session_id)
                .ok_or_else(|| ManagerError::SessionNotFound(session_id.to_string()))?;

            if entry.running.swap(true, Ordering::SeqCst) {
                return Err(ManagerError::AlreadyRunning(session_id.to_string()));
            }

            let (resolver, receiver) = oneshot::channel();
            if let Ok(mut pending) = entry.pending_run.lock() {
                *pending = Some(resolver);
            }
            (entry.commands.clone(), receiver)
        };

        let sent = commands
            .send(MainToWorker::Run {
                user_message: user_message.into(),
                existing_messages,
                config,
            })
            .await;
        if sent.is_err() {
            if let Some(entry) = self.workers.get(session_id) {
                entry.running.store(false, Ordering::SeqCst);
            }
            return Err(ManagerError::ChannelClosed);
        }

        receiver.await.map_err(|_| ManagerError::WorkerCrashed)?
    }

    pub async fn abort(&self, session_id: &str) -> Result<(), ManagerError> {
        self.send(session_id, MainToWorker::Abort).await
    }

    pub async fn clear_state(&self, session_id: &str) -> Result<(), ManagerError> {
        self.task_cache.remove(session_id);
        self.send(session_id, MainToWorker::ClearState).await
    }

    /// Forward the user's approval decision. `result: None` means approved.
    pub async fn respond_approval(
        &self,
        session_id: &str,
        request_id: impl Into<String>,
        result: Option<ApprovalOutcome>,
    ) -> Result<(), ManagerError> {
        let request_id = request_id.into();
        if let Some(entry) = self.workers.get(session_id) {
            entry.pending_requests.remove(&request_id);
        }
        self.send(session_id, MainToWorker::ApprovalResponse { request_id, result })
            .await
    }

    pub async fn respond_ask_user(
        &self,
        session_id: &str,
        request_id: impl Into<String>,
        response: impl Into<String>,
    ) -> Result<(), ManagerError> {
        let request_id = request_id.into();
        if let Some(entry) = self.workers.get(session_id) {
            entry.pending_requests.remove(&request_id);
        }
        self.send(
            session_id,
            MainToWorker::AskUserResponse {
                request_id,
                response: response.into(),
            },
        )
        .await
    }

    pub async fn set_working_directory(
        &self,
        session_id: &str,
        directory: impl Into<std::path::PathBuf>,
    ) -> Result<(), ManagerError> {
        self.send(
            session_id,
            MainToWorker::SetWorkingDirectory {
                directory: directory.into(),
            },
        )
        .await
    }

    /// Config changes apply to every open session immediately.
    pub async fn set_config(&self, endpoint: Option<EndpointConfig>, model: Option<String>) {
        for entry in self.workers.iter() {
            let _ = entry
                .commands
                .send(MainToWorker::SetConfig {
                    endpoint: endpoint.clone(),
                    model: model.clone(),
                })
                .await;
        }
    }

    /// Tool-group toggles fan out to every worker too.
    pub async fn tool_group_changed(&self, group_id: &str, enabled: bool) {
        for entry in self.workers.iter() {
            let _ = entry
                .commands
                .send(MainToWorker::ToolGroupChanged {
                    group_id: group_id.to_string(),
                    enabled,
                })
                .await;
        }
    }

    /// Manager-side compaction request with its own timeout.
    pub async fn compact(
        &self,
        session_id: &str,
        messages: Vec<Message>,
        context: CompactContext,
    ) -> Result<CompactReply, ManagerError> {
        let (commands, receiver) = {
            let entry = self
                .workers
                .get(session_id)
                .ok_or_else(|| ManagerError::SessionNotFound(session_id.to_string()))?;

            let (resolver, receiver) = oneshot::channel();
            if let Ok(mut pending) = entry.pending_compact.lock() {
                *pending = Some(resolver);
            }
            (entry.commands.clone(), receiver)
        };

        commands
            .send(MainToWorker::Compact { messages, context })
            .await
            .map_err(|_| ManagerError::ChannelClosed)?;

        match tokio::time::timeout(COMPACT_TIMEOUT, receiver).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ManagerError::WorkerCrashed),
            Err(_) => Err(ManagerError::CompactTimeout),
        }
    }

    /// Stop and remove a session's worker. Terminating an unknown or idle
    /// worker succeeds silently.
    pub async fn terminate_worker(&self, session_id: &str) {
        let Some((_, entry)) = self.workers.remove(session_id) else {
            return;
        };

        entry.terminating.store(true, Ordering::SeqCst);

        if entry.running.load(Ordering::SeqCst) {
            let _ = entry.commands.send(MainToWorker::Abort).await;

            // Give the run a moment to unwind cleanly, then force.
            let drained = tokio::time::timeout(TERMINATE_DRAIN, async {
                while entry.running.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            })
            .await;
            if drained.is_err() {
                log::warn!("[{session_id}] Worker did not drain in time, force-terminating");
            }
        }

        // Reject an outstanding run promise and drop pending modals.
        if let Ok(mut pending) = entry.pending_run.lock() {
            if let Some(resolver) = pending.take() {
                let _ = resolver.send(Err(ManagerError::Terminated));
            }
        }
        for request_id in entry.pending_requests.iter() {
            self.sink.deliver(SessionEvent {
                session_id: session_id.to_string(),
                event: UiEvent::Error {
                    message: format!("request {} dismissed", request_id.key()),
                },
            });
        }
        entry.pending_requests.clear();

        self.task_cache.remove(session_id);
        entry.host.abort();
        entry.relay.abort();
        log::info!("[{session_id}] Worker terminated");
    }

    async fn send(&self, session_id: &str, message: MainToWorker) -> Result<(), ManagerError> {
        let commands = self
            .workers
            .get(session_id)
            .map(|entry| entry.commands.clone())
            .ok_or_else(|| ManagerError::SessionNotFound(session_id.to_string()))?;

        commands
            .send(message)
            .await
            .map_err(|_| ManagerError::ChannelClosed)
    }
}

struct RelayContext {
    session_id: String,
    events: mpsc::Receiver<WorkerToMain>,
    sink: Arc<dyn UiSink>,
    running: Arc<AtomicBool>,
    terminating: Arc<AtomicBool>,
    pending_run: Arc<Mutex<Option<RunResolver>>>,
    pending_compact: Arc<Mutex<Option<oneshot::Sender<CompactReply>>>>,
    pending_requests: Arc<DashSet<String>>,
    task_cache: Arc<DashMap<String, CachedTask>>,
}

/// Pump one worker's events: enrich broadcasts with the session id, resolve
/// pending run/compact promises, and track modal request ids.
async fn relay_loop(mut ctx: RelayContext) {
    while let Some(event) = ctx.events.recv().await {
        match event {
            WorkerToMain::Ready => {}
            WorkerToMain::Broadcast { event } => {
                match &event {
                    UiEvent::TodoUpdate { todos } => {
                        ctx.task_cache
                            .entry(ctx.session_id.clone())
                            .or_default()
                            .todos = todos.clone();
                    }
                    UiEvent::SessionTitle { title } => {
                        ctx.task_cache
                            .entry(ctx.session_id.clone())
                            .or_default()
                            .title = Some(title.clone());
                    }
                    _ => {}
                }
                ctx.sink.deliver(SessionEvent {
                    session_id: ctx.session_id.clone(),
                    event,
                });
            }
            WorkerToMain::Complete { result } => {
                ctx.running.store(false, Ordering::SeqCst);
                if let Ok(mut pending) = ctx.pending_run.lock() {
                    if let Some(resolver) = pending.take() {
                        let _ = resolver.send(Ok(result));
                    }
                }
            }
            WorkerToMain::Error { error } => {
                ctx.sink.deliver(SessionEvent {
                    session_id: ctx.session_id.clone(),
                    event: UiEvent::Error { message: error },
                });
            }
            WorkerToMain::ApprovalRequest {
                request_id,
                tool_name,
                arguments,
                reason,
            } => {
                ctx.pending_requests.insert(request_id.clone());
                ctx.sink.deliver(SessionEvent {
                    session_id: ctx.session_id.clone(),
                    event: UiEvent::ApprovalRequest {
                        request_id,
                        tool_name,
                        arguments,
                        reason,
                    },
                });
            }
            WorkerToMain::AskUser {
                request_id,
                request,
            } => {
                ctx.pending_requests.insert(request_id.clone());
                ctx.sink.deliver(SessionEvent {
                    session_id: ctx.session_id.clone(),
                    event: UiEvent::AskUser {
                        request_id,
                        request,
                    },
                });
            }
            WorkerToMain::FileEdit { preview } => {
                ctx.sink.deliver(SessionEvent {
                    session_id: ctx.session_id.clone(),
                    event: UiEvent::FileEdit { preview },
                });
            }
            WorkerToMain::ShowTaskWindow => ctx.sink.show_task_window(&ctx.session_id),
            WorkerToMain::FlashWindows => ctx.sink.flash_windows(),
            WorkerToMain::CompactResult { result } => {
                if let Ok(mut pending) = ctx.pending_compact.lock() {
                    if let Some(resolver) = pending.take() {
                        let _ = resolver.send(result);
                    }
                }
            }
        }
    }

    // The event channel closed. If this was not an orderly termination, the
    // worker crashed: reject the pending run and dismiss any modals.
    if ctx.terminating.load(Ordering::SeqCst) {
        return;
    }

    let was_running = ctx.running.swap(false, Ordering::SeqCst);
    let rejected = {
        let mut pending = match ctx.pending_run.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };
        match pending.take() {
            Some(resolver) => {
                let _ = resolver.send(Err(ManagerError::WorkerCrashed));
                true
            }
            None => false,
        }
    };
    ctx.pending_requests.clear();

    if was_running || rejected {
        log::error!("[{}] Worker exited unexpectedly", ctx.session_id);
        ctx.sink.deliver(SessionEvent {
            session_id: ctx.session_id.clone(),
            event: UiEvent::Error {
                message: "agent:error - worker exited unexpectedly".to_string(),
            },
        });
    }
}
