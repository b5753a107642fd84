//! The per-session agent loop and the one-shot planner.
//!
//! `run_agent` drives the plan → LLM → tool-call → tool-result cycle until
//! the model calls `final_response`, the user aborts, or a fatal condition
//! (quota, repeated malformed arguments) ends the run.

pub mod config;
pub mod planner;
pub mod prompt;
pub mod recovery;
pub mod result;
pub mod runner;

pub use config::{AgentDeps, AgentRunConfig};
pub use planner::{Complexity, PlanOutcome, Planner, PlannerError};
pub use prompt::{build_system_prompt, build_turn_envelope};
pub use result::AgentRunResult;
pub use runner::run_agent;
