use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Context error: {0}")]
    Context(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Agent aborted")]
    Aborted,
}
