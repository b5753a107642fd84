//! Shared types for the deskagent orchestrator core.
//!
//! Everything that crosses a crate boundary lives here: chat messages, tool
//! call/result shapes, TODO items, the per-session run state, UI broadcast
//! events and the [`AgentIO`] collaborator the loop and tools talk to.

pub mod approval;
pub mod config;
pub mod error;
pub mod events;
pub mod io;
pub mod message;
pub mod run;
pub mod todo;
pub mod tools;

pub use approval::ApprovalOutcome;
pub use config::{AppConfig, EndpointConfig, ModelConfig, Settings};
pub use error::AgentError;
pub use events::{AskUserRequest, FileEditPreview, SessionEvent, UiEvent};
pub use io::{AgentIO, NullIo};
pub use message::{validate_tool_messages, Message, Role};
pub use run::{AgentRunState, ContextUsage, RunHandle};
pub use todo::{render_checklist, TodoItem, TodoStatus};
pub use tools::{
    finalize_tool_calls, FunctionCall, FunctionSchema, ToolCall, ToolCallAccumulator, ToolOutcome,
    ToolSchema,
};
