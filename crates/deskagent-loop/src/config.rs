use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use deskagent_context::ContextTracker;
use deskagent_core::{AgentIO, AgentRunState};
use deskagent_llm::ChatClient;
use deskagent_tools::{SimpleToolExecutor, ToolRegistry};

/// Per-run options, as carried by the worker protocol's `run` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunConfig {
    /// Override the session's working directory for this run.
    pub working_directory: Option<PathBuf>,
    /// Skip the planner entirely when false.
    pub enable_planning: bool,
    /// Keep the previous run's TODO list instead of clearing it.
    pub resume_todos: bool,
    /// Bypass every approval prompt when true.
    pub auto_mode: bool,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    /// The model's context window, for the auto-compact threshold.
    pub context_window: u32,
    pub stream_response: bool,
}

impl Default for AgentRunConfig {
    fn default() -> Self {
        Self {
            working_directory: None,
            enable_planning: true,
            resume_todos: false,
            auto_mode: false,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_output_tokens: None,
            context_window: 128_000,
            stream_response: false,
        }
    }
}

/// The loop's collaborators. One set per worker; everything is shareable so
/// the host can run the loop on a child task while staying responsive.
#[derive(Clone)]
pub struct AgentDeps {
    pub llm: Arc<dyn ChatClient>,
    pub registry: Arc<ToolRegistry>,
    pub executor: Arc<SimpleToolExecutor>,
    pub io: Arc<dyn AgentIO>,
    pub state: Arc<AgentRunState>,
    pub tracker: Arc<Mutex<ContextTracker>>,
}

impl AgentDeps {
    pub fn new(
        llm: Arc<dyn ChatClient>,
        registry: Arc<ToolRegistry>,
        io: Arc<dyn AgentIO>,
        state: Arc<AgentRunState>,
    ) -> Self {
        let executor = Arc::new(SimpleToolExecutor::new(Arc::clone(&registry)));
        Self {
            llm,
            registry,
            executor,
            io,
            state,
            tracker: Arc::new(Mutex::new(ContextTracker::new())),
        }
    }
}
