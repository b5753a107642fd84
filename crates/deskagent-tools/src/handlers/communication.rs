use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use deskagent_core::{AskUserRequest, ToolOutcome, UiEvent};

use crate::executor::{ToolContext, ToolHandler};

/// `tell_to_user`: one-way progress note.
pub struct TellToUser;

#[async_trait]
impl ToolHandler for TellToUser {
    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(message) = args.get("message").and_then(Value::as_str) else {
            return ToolOutcome::failure("Missing 'message' parameter");
        };

        ctx.io
            .broadcast(UiEvent::TellUser {
                message: message.to_string(),
            })
            .await;

        ToolOutcome::ok("Message delivered to user")
    }
}

/// `ask_to_user`: round-trip question. Blocks until the user answers or the
/// IO layer times out with the default answer.
pub struct AskToUser;

#[async_trait]
impl ToolHandler for AskToUser {
    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(question) = args.get("question").and_then(Value::as_str) else {
            return ToolOutcome::failure("Missing 'question' parameter");
        };

        let options: Vec<String> = args
            .get("options")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let allow_custom = args
            .get("allow_custom")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let request = AskUserRequest {
            question: question.to_string(),
            options,
            allow_custom,
        };

        ctx.io.flash_windows().await;
        let answer = ctx
            .io
            .ask_user(Uuid::new_v4().to_string(), request)
            .await;

        ToolOutcome::ok(format!("User answered: {answer}"))
    }
}

/// `final_response`: the distinguished terminal tool. The handler only
/// validates and echoes; the loop watches for the metadata flag and ends the
/// run.
pub struct FinalResponse;

#[async_trait]
impl ToolHandler for FinalResponse {
    async fn run(&self, args: Value, _ctx: &ToolContext) -> ToolOutcome {
        let Some(message) = args.get("message").and_then(Value::as_str) else {
            return ToolOutcome::failure("Missing 'message' parameter");
        };

        if message.trim().is_empty() {
            return ToolOutcome::failure("Final response message must not be empty");
        }

        ToolOutcome::ok(message.to_string()).with_metadata(json!({ "isFinalResponse": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use deskagent_core::{AgentRunState, NullIo};

    fn ctx() -> ToolContext {
        let state = Arc::new(AgentRunState::new("/tmp"));
        let handle = state.begin_run(true);
        ToolContext {
            working_directory: PathBuf::from("/tmp"),
            cancel: handle.cancel_token(),
            io: Arc::new(NullIo),
            handle,
        }
    }

    #[tokio::test]
    async fn final_response_tags_metadata() {
        let outcome = FinalResponse
            .run(json!({ "message": "all done" }), &ctx())
            .await;

        assert!(outcome.success);
        assert!(outcome.is_final_response());
        assert_eq!(outcome.result.as_deref(), Some("all done"));
    }

    #[tokio::test]
    async fn final_response_requires_a_message() {
        let outcome = FinalResponse.run(json!({}), &ctx()).await;
        assert!(!outcome.success);

        let outcome = FinalResponse.run(json!({ "message": "   " }), &ctx()).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn ask_to_user_falls_back_to_first_option() {
        let outcome = AskToUser
            .run(
                json!({ "question": "which?", "options": ["red", "blue"] }),
                &ctx(),
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.result.as_deref(), Some("User answered: red"));
    }

    #[tokio::test]
    async fn tell_to_user_requires_a_message() {
        let outcome = TellToUser.run(json!({}), &ctx()).await;
        assert!(!outcome.success);
    }
}
