//! One worker per session: a tokio task owning the session's registry,
//! client, tracker and agent state, driven by [`MainToWorker`] commands.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use deskagent_context::{Compactor, ContextTracker};
use deskagent_core::{
    AgentIO, AgentRunState, ApprovalOutcome, AskUserRequest, EndpointConfig, FileEditPreview,
    UiEvent,
};
use deskagent_llm::{ChatClient, HttpLlmClient, LlmError, RetryObserver};
use deskagent_loop::{run_agent, AgentDeps, AgentRunConfig};
use deskagent_tools::{SimpleToolExecutor, ToolCatalog, ToolRegistry};

use crate::protocol::{CompactContext, CompactReply, MainToWorker, WorkerToMain};

/// Approval and ask-user round trips resolve locally after this long.
pub const ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(300);

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

pub struct WorkerSettings {
    pub working_directory: PathBuf,
    pub endpoint: Option<EndpointConfig>,
    pub model: Option<String>,
}

/// What the manager holds for one spawned worker.
pub struct WorkerHandle {
    pub session_id: String,
    pub commands: mpsc::Sender<MainToWorker>,
    pub events: mpsc::Receiver<WorkerToMain>,
    pub join: JoinHandle<()>,
}

pub fn spawn_worker(
    session_id: impl Into<String>,
    enabled_groups: Vec<String>,
    settings: WorkerSettings,
) -> WorkerHandle {
    spawn_worker_with_client(session_id, enabled_groups, settings, None)
}

/// Like [`spawn_worker`], with an injected chat client (used by tests and
/// embedders with their own transport).
pub fn spawn_worker_with_client(
    session_id: impl Into<String>,
    enabled_groups: Vec<String>,
    settings: WorkerSettings,
    client_override: Option<Arc<dyn ChatClient>>,
) -> WorkerHandle {
    let session_id = session_id.into();
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

    let registry = Arc::new(ToolRegistry::new(Arc::new(ToolCatalog::builtin())));
    for group in &enabled_groups {
        registry.enable(group);
    }

    let retry_observer: Arc<dyn RetryObserver> = Arc::new(ChannelRetryObserver {
        out: event_tx.clone(),
    });
    let has_client_override = client_override.is_some();
    let client = client_override.unwrap_or_else(|| {
        client_for_endpoint(settings.endpoint.as_ref(), Arc::clone(&retry_observer))
    });

    let host = Arc::new(WorkerHost {
        session_id: session_id.clone(),
        state: Arc::new(AgentRunState::new(settings.working_directory)),
        registry,
        tracker: Arc::new(Mutex::new(ContextTracker::new())),
        io: Arc::new(WorkerIo::new(event_tx.clone())),
        client: RwLock::new(client),
        has_client_override,
        retry_observer,
        model: RwLock::new(settings.model),
        out: event_tx,
    });

    let join = tokio::spawn(host_loop(host, command_rx));

    WorkerHandle {
        session_id,
        commands: command_tx,
        events: event_rx,
        join,
    }
}

fn client_for_endpoint(
    endpoint: Option<&EndpointConfig>,
    observer: Arc<dyn RetryObserver>,
) -> Arc<dyn ChatClient> {
    // Local OpenAI-compatible default until the first setConfig.
    let base_url = endpoint
        .map(|endpoint| endpoint.base_url.clone())
        .unwrap_or_else(|| "http://127.0.0.1:11434/v1".to_string());

    let mut client = HttpLlmClient::new(base_url).with_retry_observer(observer);
    if let Some(key) = endpoint.and_then(|endpoint| endpoint.api_key.as_deref()) {
        client = client.with_api_key(key);
    }
    Arc::new(client)
}

/// Surfaces LLM backoff to the UI as `retryableError` + `countdown`
/// broadcasts.
struct ChannelRetryObserver {
    out: mpsc::Sender<WorkerToMain>,
}

impl RetryObserver for ChannelRetryObserver {
    fn on_retry(&self, attempt: u32, delay: Duration, error: &LlmError) {
        let _ = self.out.try_send(WorkerToMain::Broadcast {
            event: UiEvent::RetryableError {
                message: error.to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            },
        });
        let _ = self.out.try_send(WorkerToMain::Broadcast {
            event: UiEvent::Countdown {
                seconds: delay.as_secs(),
                reason: "retrying LLM request".to_string(),
            },
        });
    }
}

struct WorkerHost {
    session_id: String,
    state: Arc<AgentRunState>,
    registry: Arc<ToolRegistry>,
    tracker: Arc<Mutex<ContextTracker>>,
    io: Arc<WorkerIo>,
    client: RwLock<Arc<dyn ChatClient>>,
    has_client_override: bool,
    retry_observer: Arc<dyn RetryObserver>,
    model: RwLock<Option<String>>,
    out: mpsc::Sender<WorkerToMain>,
}

async fn host_loop(host: Arc<WorkerHost>, mut commands: mpsc::Receiver<MainToWorker>) {
    let _ = host.out.send(WorkerToMain::Ready).await;
    log::info!("[{}] Worker ready", host.session_id);

    while let Some(command) = commands.recv().await {
        host.handle(command).await;
    }

    // Channel closed: the manager dropped us. Release anything waiting.
    host.state.cancel();
    host.io.release_pending();
    log::info!("[{}] Worker shutting down", host.session_id);
}

impl WorkerHost {
    fn current_client(&self) -> Arc<dyn ChatClient> {
        self.client
            .read()
            .map(|client| Arc::clone(&client))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()))
    }

    async fn handle(self: &Arc<Self>, command: MainToWorker) {
        match command {
            MainToWorker::Run {
                user_message,
                existing_messages,
                config,
            } => self.handle_run(user_message, existing_messages, config).await,
            MainToWorker::Abort => {
                log::info!("[{}] Abort requested", self.session_id);
                self.state.cancel();
                self.current_client().abort();
                self.io.release_pending();
            }
            MainToWorker::ClearState => {
                self.state.clear_todos();
                if let Ok(mut tracker) = self.tracker.lock() {
                    tracker.reset(0);
                }
                self.io
                    .broadcast(UiEvent::TodoUpdate { todos: Vec::new() })
                    .await;
            }
            MainToWorker::AskUserResponse {
                request_id,
                response,
            } => self.io.resolve_ask(&request_id, response),
            MainToWorker::ApprovalResponse { request_id, result } => self
                .io
                .resolve_approval(&request_id, result.unwrap_or(ApprovalOutcome::ApprovedOnce)),
            MainToWorker::SetConfig { endpoint, model } => {
                if let Some(model) = model {
                    if let Ok(mut current) = self.model.write() {
                        *current = Some(model);
                    }
                }
                if !self.has_client_override {
                    if let Some(endpoint) = endpoint {
                        if let Ok(mut client) = self.client.write() {
                            *client = client_for_endpoint(
                                Some(&endpoint),
                                Arc::clone(&self.retry_observer),
                            );
                        }
                    }
                }
            }
            MainToWorker::SetWorkingDirectory { directory } => {
                self.state.set_working_directory(&directory);
            }
            MainToWorker::ToolGroupChanged { group_id, enabled } => {
                if enabled {
                    let outcome = self.registry.enable(&group_id);
                    log::debug!("[{}] enable {group_id}: {outcome:?}", self.session_id);
                } else {
                    let outcome = self.registry.disable(&group_id);
                    log::debug!("[{}] disable {group_id}: {outcome:?}", self.session_id);
                }
            }
            MainToWorker::Compact { messages, context } => {
                self.handle_compact(messages, context);
            }
        }
    }

    async fn handle_run(
        self: &Arc<Self>,
        user_message: String,
        existing_messages: Vec<deskagent_core::Message>,
        mut config: AgentRunConfig,
    ) {
        if self.state.is_running() {
            let _ = self
                .out
                .send(WorkerToMain::Error {
                    error: "session is already running".to_string(),
                })
                .await;
            return;
        }

        if let Ok(model) = self.model.read() {
            if let Some(model) = model.as_ref() {
                config.model = model.clone();
            }
        }

        let deps = AgentDeps {
            llm: self.current_client(),
            registry: Arc::clone(&self.registry),
            executor: Arc::new(SimpleToolExecutor::new(Arc::clone(&self.registry))),
            io: Arc::clone(&self.io) as Arc<dyn AgentIO>,
            state: Arc::clone(&self.state),
            tracker: Arc::clone(&self.tracker),
        };
        let out = self.out.clone();
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            let result = run_agent(user_message, existing_messages, deps, config).await;
            log::info!(
                "[{session_id}] Run finished (success: {}, {} message(s))",
                result.success,
                result.messages.len()
            );
            let _ = out.send(WorkerToMain::Complete { result }).await;
        });
    }

    fn handle_compact(
        self: &Arc<Self>,
        messages: Vec<deskagent_core::Message>,
        context: CompactContext,
    ) {
        let client = self.current_client();
        let out = self.out.clone();

        tokio::spawn(async move {
            let compactor = Compactor::new(client);
            let result = match compactor
                .compact(
                    &messages,
                    &context.working_directory,
                    &context.model,
                    CancellationToken::new(),
                )
                .await
            {
                Ok(outcome) => CompactReply {
                    success: true,
                    summary: Some(outcome.summary),
                    replacement: Some(vec![outcome.replacement.0, outcome.replacement.1]),
                    reason: None,
                },
                Err(error) => CompactReply {
                    success: false,
                    summary: None,
                    replacement: None,
                    reason: Some(error.to_string()),
                },
            };
            let _ = out.send(WorkerToMain::CompactResult { result }).await;
        });
    }
}

struct PendingAsk {
    resolver: oneshot::Sender<String>,
    default_answer: String,
}

/// [`AgentIO`] over the worker→main channel, with local resolution of
/// round-trip timeouts.
pub(crate) struct WorkerIo {
    out: mpsc::Sender<WorkerToMain>,
    pending_approvals: DashMap<String, oneshot::Sender<ApprovalOutcome>>,
    pending_asks: DashMap<String, PendingAsk>,
}

impl WorkerIo {
    fn new(out: mpsc::Sender<WorkerToMain>) -> Self {
        Self {
            out,
            pending_approvals: DashMap::new(),
            pending_asks: DashMap::new(),
        }
    }

    pub(crate) fn resolve_approval(&self, request_id: &str, outcome: ApprovalOutcome) {
        if let Some((_, resolver)) = self.pending_approvals.remove(request_id) {
            let _ = resolver.send(outcome);
        }
    }

    pub(crate) fn resolve_ask(&self, request_id: &str, response: String) {
        if let Some((_, pending)) = self.pending_asks.remove(request_id) {
            let _ = pending.resolver.send(response);
        }
    }

    /// Resolve everything outstanding: approvals as rejections, ask-user as
    /// the default answer. Called on abort and shutdown so the UI never sees
    /// an orphaned modal.
    pub(crate) fn release_pending(&self) {
        let approval_ids: Vec<String> = self
            .pending_approvals
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in approval_ids {
            self.resolve_approval(
                &id,
                ApprovalOutcome::Rejected {
                    comment: "Session aborted".to_string(),
                },
            );
        }

        let ask_ids: Vec<String> = self
            .pending_asks
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ask_ids {
            if let Some((_, pending)) = self.pending_asks.remove(&id) {
                let default = pending.default_answer.clone();
                let _ = pending.resolver.send(default);
            }
        }
    }
}

#[async_trait]
impl AgentIO for WorkerIo {
    async fn broadcast(&self, event: UiEvent) {
        let _ = self.out.send(WorkerToMain::Broadcast { event }).await;
    }

    async fn request_approval(
        &self,
        request_id: String,
        tool_name: String,
        arguments: Value,
        reason: Option<String>,
    ) -> ApprovalOutcome {
        let (resolver, receiver) = oneshot::channel();
        self.pending_approvals.insert(request_id.clone(), resolver);

        let sent = self
            .out
            .send(WorkerToMain::ApprovalRequest {
                request_id: request_id.clone(),
                tool_name,
                arguments,
                reason,
            })
            .await;
        if sent.is_err() {
            self.pending_approvals.remove(&request_id);
            return ApprovalOutcome::Rejected {
                comment: "Worker channel closed".to_string(),
            };
        }

        match tokio::time::timeout(ROUND_TRIP_TIMEOUT, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => ApprovalOutcome::Rejected {
                comment: "Session aborted".to_string(),
            },
            Err(_) => {
                self.pending_approvals.remove(&request_id);
                ApprovalOutcome::Timeout
            }
        }
    }

    async fn ask_user(&self, request_id: String, request: AskUserRequest) -> String {
        let default_answer = request.default_answer();
        let (resolver, receiver) = oneshot::channel();
        self.pending_asks.insert(
            request_id.clone(),
            PendingAsk {
                resolver,
                default_answer: default_answer.clone(),
            },
        );

        let sent = self
            .out
            .send(WorkerToMain::AskUser {
                request_id: request_id.clone(),
                request,
            })
            .await;
        if sent.is_err() {
            self.pending_asks.remove(&request_id);
            return default_answer;
        }

        match tokio::time::timeout(ROUND_TRIP_TIMEOUT, receiver).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => default_answer,
            Err(_) => {
                self.pending_asks.remove(&request_id);
                default_answer
            }
        }
    }

    async fn send_file_edit(&self, preview: FileEditPreview) {
        let _ = self.out.send(WorkerToMain::FileEdit { preview }).await;
    }

    async fn show_task_window(&self) {
        let _ = self.out.send(WorkerToMain::ShowTaskWindow).await;
    }

    async fn flash_windows(&self) {
        let _ = self.out.send(WorkerToMain::FlashWindows).await;
    }
}
