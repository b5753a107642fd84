use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::run::ContextUsage;
use crate::todo::TodoItem;

/// A question routed to the user through the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskUserRequest {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default = "default_allow_custom")]
    pub allow_custom: bool,
}

fn default_allow_custom() -> bool {
    true
}

impl AskUserRequest {
    /// Fallback answer when the user never responds.
    pub fn default_answer(&self) -> String {
        self.options.first().cloned().unwrap_or_default()
    }
}

/// Diff preview sent to the UI before an `edit_file` approval prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEditPreview {
    pub path: String,
    pub original_content: String,
    pub new_content: String,
    pub language: String,
}

/// Everything the workers broadcast towards the UI.
///
/// The worker manager re-wraps these in [`SessionEvent`] so listeners can
/// filter by channel + session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", content = "data", rename_all = "camelCase")]
pub enum UiEvent {
    TodoUpdate {
        todos: Vec<TodoItem>,
    },
    TellUser {
        message: String,
    },
    Message {
        role: String,
        content: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        success: bool,
        result: String,
    },
    Reasoning {
        content: String,
        done: bool,
    },
    ContextUpdate {
        usage: ContextUsage,
    },
    Complete {
        response: String,
    },
    Error {
        message: String,
    },
    RetryableError {
        message: String,
        attempt: u32,
        delay_ms: u64,
    },
    ApprovalRequest {
        request_id: String,
        tool_name: String,
        arguments: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    AskUser {
        request_id: String,
        request: AskUserRequest,
    },
    FileEdit {
        preview: FileEditPreview,
    },
    SessionTitle {
        title: String,
    },
    Countdown {
        seconds: u64,
        reason: String,
    },
    AutoSyncResult {
        success: bool,
        detail: String,
    },
}

impl UiEvent {
    /// Channel name as the UI sees it.
    pub fn channel(&self) -> &'static str {
        match self {
            UiEvent::TodoUpdate { .. } => "todoUpdate",
            UiEvent::TellUser { .. } => "tellUser",
            UiEvent::Message { .. } => "message",
            UiEvent::ToolCall { .. } => "toolCall",
            UiEvent::ToolResult { .. } => "toolResult",
            UiEvent::Reasoning { .. } => "reasoning",
            UiEvent::ContextUpdate { .. } => "contextUpdate",
            UiEvent::Complete { .. } => "complete",
            UiEvent::Error { .. } => "error",
            UiEvent::RetryableError { .. } => "retryableError",
            UiEvent::ApprovalRequest { .. } => "approvalRequest",
            UiEvent::AskUser { .. } => "askUser",
            UiEvent::FileEdit { .. } => "fileEdit",
            UiEvent::SessionTitle { .. } => "sessionTitle",
            UiEvent::Countdown { .. } => "countdown",
            UiEvent::AutoSyncResult { .. } => "autoSyncResult",
        }
    }
}

/// A broadcast enriched with the originating session, as delivered to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub event: UiEvent,
}
