//! OpenAI-compatible chat-completions client.
//!
//! Buffered requests retry transient failures with exponential backoff;
//! streaming requests read SSE and never retry. Context-length and quota
//! errors are classified into distinguished variants the agent loop handles
//! specially.

pub mod client;
pub mod error;
pub mod preprocess;
pub mod sse;
pub mod types;

pub use client::{ChatClient, HttpLlmClient, RetryObserver};
pub use error::{is_context_length_message, is_quota_message, LlmError, Result};
pub use preprocess::prepare_messages;
pub use types::{ChatCompletion, ChatOptions, ChatUsage, LlmChunk, LlmStream, ToolChoice};
