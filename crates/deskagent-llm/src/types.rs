use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use deskagent_core::ToolCall;

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A fully assembled (non-delta) completion.
#[derive(Debug, Clone, Default)]
pub struct ChatCompletion {
    pub content: String,
    pub reasoning_content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Required,
    None,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::Required => "required",
            ToolChoice::None => "none",
        }
    }
}

/// Per-request knobs. `cancel` is observed at every await point; cancelling
/// it surfaces [`crate::LlmError::Cancelled`] without retries.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub tool_choice: Option<ToolChoice>,
    pub cancel: CancellationToken,
}

impl ChatOptions {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tool_choice: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// One streamed delta.
#[derive(Debug, Clone)]
pub enum LlmChunk {
    Token(String),
    Reasoning(String),
    ToolCalls(Vec<ToolCall>),
    Usage(ChatUsage),
    Done,
}

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmChunk>> + Send>>;
