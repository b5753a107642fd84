//! Typed messages between the manager ("main") and a worker, plus a
//! length-prefixed JSON framing for transports that need bytes.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use deskagent_core::{
    ApprovalOutcome, AskUserRequest, EndpointConfig, FileEditPreview, Message, UiEvent,
};
use deskagent_loop::{AgentRunConfig, AgentRunResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactContext {
    pub working_directory: PathBuf,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MainToWorker {
    Run {
        user_message: String,
        existing_messages: Vec<Message>,
        config: AgentRunConfig,
    },
    Abort,
    ClearState,
    AskUserResponse {
        request_id: String,
        response: String,
    },
    /// `result: None` means approved.
    ApprovalResponse {
        request_id: String,
        result: Option<ApprovalOutcome>,
    },
    SetConfig {
        endpoint: Option<EndpointConfig>,
        model: Option<String>,
    },
    SetWorkingDirectory {
        directory: PathBuf,
    },
    ToolGroupChanged {
        group_id: String,
        enabled: bool,
    },
    Compact {
        messages: Vec<Message>,
        context: CompactContext,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerToMain {
    Ready,
    Broadcast {
        event: UiEvent,
    },
    Complete {
        result: AgentRunResult,
    },
    Error {
        error: String,
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
    ShowTaskWindow,
    FlashWindows,
    CompactResult {
        result: CompactReply,
    },
}

/// Upper bound on a single frame. Anything larger is treated as corrupt
/// rather than allocated blindly.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Encode a message as a 4-byte big-endian length prefix followed by JSON.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(message)?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one frame from the front of `bytes`. Returns the message and the
/// number of bytes consumed, or `None` if the buffer does not yet hold a
/// complete, sane frame.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Option<(T, usize)> {
    if bytes.len() < 4 {
        return None;
    }
    let mut length_bytes = [0u8; 4];
    length_bytes.copy_from_slice(&bytes[..4]);
    let length = u32::from_be_bytes(length_bytes) as usize;

    if length > MAX_FRAME_BYTES || bytes.len() < 4 + length {
        return None;
    }

    let message = serde_json::from_slice(&bytes[4..4 + length]).ok()?;
    Some((message, 4 + length))
}
