//! One-shot planning call.
//!
//! The planner either answers trivial requests directly or produces an
//! ordered TODO list with a session title. It may ask the user clarifying
//! questions through `ask_to_user`; that Q&A is returned so the loop can
//! prepend it to history. Planner failures are non-fatal: the loop proceeds
//! with an empty list.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use deskagent_core::{AgentIO, AskUserRequest, Message, RunHandle, TodoItem, TodoStatus};
use deskagent_llm::{ChatClient, ChatOptions, LlmError, ToolChoice};
use deskagent_tools::ToolRegistry;

use crate::config::AgentRunConfig;

const MAX_CLARIFICATION_ROUNDS: usize = 3;

const PLANNER_SYSTEM_PROMPT: &str = "\
You are the planning stage of a desktop assistant. Given the user's request, decide whether it \
needs tool work.

- If the request is purely conversational or trivially answerable, respond with JSON:
  {\"directResponse\": \"<your answer>\"}
- Otherwise respond with JSON:
  {\"title\": \"<short session title>\", \"complexity\": \"low\"|\"medium\"|\"high\", \
\"todos\": [{\"id\": \"1\", \"title\": \"<step>\"}, ...]}

Keep todo steps concrete and ordered. Respond with the JSON object only, no prose around it.
If a decision blocks planning, you may call the ask_to_user tool first.";

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("invalid planner response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug)]
pub enum PlanOutcome {
    /// Answer the user directly; no loop iterations needed.
    Direct(String),
    Plan {
        todos: Vec<TodoItem>,
        title: String,
        complexity: Complexity,
        /// ask_to_user Q&A that happened during planning, for the history.
        clarifications: Vec<Message>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlannerResponse {
    direct_response: Option<String>,
    todos: Option<Vec<PlannedTodo>>,
    title: Option<String>,
    complexity: Option<Complexity>,
}

#[derive(Debug, Deserialize)]
struct PlannedTodo {
    id: Option<String>,
    title: String,
}

pub struct Planner {
    llm: Arc<dyn ChatClient>,
    io: Arc<dyn AgentIO>,
}

impl Planner {
    pub fn new(llm: Arc<dyn ChatClient>, io: Arc<dyn AgentIO>) -> Self {
        Self { llm, io }
    }

    pub async fn plan(
        &self,
        registry: &ToolRegistry,
        handle: &RunHandle,
        user_message: &str,
        history: &[Message],
        config: &AgentRunConfig,
    ) -> Result<PlanOutcome, PlannerError> {
        let system_prompt = format!(
            "{PLANNER_SYSTEM_PROMPT}\n\n{}",
            registry.summary_for_planning()
        );

        let ask_tool: Vec<_> = registry
            .definition("ask_to_user")
            .map(|def| vec![def.schema()])
            .unwrap_or_default();

        let mut clarifications: Vec<Message> = Vec::new();

        for _round in 0..=MAX_CLARIFICATION_ROUNDS {
            let mut messages: Vec<Message> = history.to_vec();
            messages.push(Message::user(user_message.to_string()));
            messages.extend(clarifications.iter().cloned());

            let options = ChatOptions {
                model: config.model.clone(),
                temperature: config.temperature,
                max_tokens: config.max_output_tokens,
                tool_choice: Some(ToolChoice::Auto),
                cancel: handle.cancel_token(),
            };

            let completion = self
                .llm
                .chat(&system_prompt, &messages, &ask_tool, &options)
                .await?;

            let ask_call = completion
                .tool_calls
                .iter()
                .find(|call| call.function.name == "ask_to_user")
                .cloned();

            if let Some(call) = ask_call {
                let request = parse_ask_request(&call.function.arguments);
                let answer = self
                    .io
                    .ask_user(Uuid::new_v4().to_string(), request)
                    .await;

                clarifications.push(Message::assistant(
                    completion.content.clone(),
                    Some(vec![call.clone()]),
                ));
                clarifications.push(Message::tool_result(
                    call.id.clone(),
                    format!("User answered: {answer}"),
                ));
                continue;
            }

            return parse_plan(&completion.content, user_message, clarifications);
        }

        Err(PlannerError::InvalidResponse(
            "planner never produced a plan after clarification rounds".to_string(),
        ))
    }
}

fn parse_ask_request(arguments: &str) -> AskUserRequest {
    let args: Value = serde_json::from_str(arguments).unwrap_or(Value::Null);
    AskUserRequest {
        question: args
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or("Please clarify your request.")
            .to_string(),
        options: args
            .get("options")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
        allow_custom: args
            .get("allow_custom")
            .and_then(Value::as_bool)
            .unwrap_or(true),
    }
}

fn parse_plan(
    content: &str,
    user_message: &str,
    clarifications: Vec<Message>,
) -> Result<PlanOutcome, PlannerError> {
    let json_text = extract_json_object(content).ok_or_else(|| {
        PlannerError::InvalidResponse(format!("no JSON object in planner output: {content}"))
    })?;

    let response: PlannerResponse = serde_json::from_str(json_text)
        .map_err(|error| PlannerError::InvalidResponse(error.to_string()))?;

    if let Some(direct) = response.direct_response {
        return Ok(PlanOutcome::Direct(direct));
    }

    let Some(todos) = response.todos else {
        return Err(PlannerError::InvalidResponse(
            "planner output has neither directResponse nor todos".to_string(),
        ));
    };

    let todos: Vec<TodoItem> = todos
        .into_iter()
        .enumerate()
        .map(|(index, todo)| TodoItem {
            id: todo.id.unwrap_or_else(|| (index + 1).to_string()),
            title: todo.title,
            status: TodoStatus::Pending,
            note: None,
        })
        .collect();

    let title = response
        .title
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| fallback_title(user_message));

    Ok(PlanOutcome::Plan {
        todos,
        title,
        complexity: response.complexity.unwrap_or(Complexity::Medium),
        clarifications,
    })
}

fn fallback_title(user_message: &str) -> String {
    let title: String = user_message.chars().take(40).collect();
    if user_message.chars().count() > 40 {
        format!("{title}...")
    } else {
        title
    }
}

/// Pull the outermost `{...}` span out of a possibly fenced/prosy response.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_handles_fences_and_prose() {
        assert_eq!(
            extract_json_object("```json\n{\"a\":1}\n```"),
            Some("{\"a\":1}")
        );
        assert_eq!(extract_json_object("Here: {\"a\":1}."), Some("{\"a\":1}"));
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn parse_plan_direct_response() {
        let outcome = parse_plan(r#"{"directResponse": "4"}"#, "What is 2+2?", Vec::new());
        match outcome.unwrap() {
            PlanOutcome::Direct(answer) => assert_eq!(answer, "4"),
            other => panic!("expected direct response, got {other:?}"),
        }
    }

    #[test]
    fn parse_plan_builds_pending_todos_with_ids() {
        let content = r#"{"title": "Refactor config", "complexity": "high",
            "todos": [{"title": "read the module"}, {"id": "b", "title": "rewrite it"}]}"#;

        match parse_plan(content, "refactor", Vec::new()).unwrap() {
            PlanOutcome::Plan {
                todos,
                title,
                complexity,
                ..
            } => {
                assert_eq!(title, "Refactor config");
                assert_eq!(complexity, Complexity::High);
                assert_eq!(todos.len(), 2);
                assert_eq!(todos[0].id, "1");
                assert_eq!(todos[1].id, "b");
                assert!(todos.iter().all(|t| t.status == TodoStatus::Pending));
            }
            other => panic!("expected plan, got {other:?}"),
        }
    }

    #[test]
    fn parse_plan_falls_back_to_truncated_title() {
        let long_request = "please ".repeat(20);
        let content = r#"{"todos": [{"title": "step"}]}"#;

        match parse_plan(content, &long_request, Vec::new()).unwrap() {
            PlanOutcome::Plan { title, .. } => {
                assert!(title.ends_with("..."));
                assert_eq!(title.chars().count(), 43);
            }
            other => panic!("expected plan, got {other:?}"),
        }
    }

    #[test]
    fn parse_plan_rejects_unusable_output() {
        assert!(parse_plan("I would suggest...", "x", Vec::new()).is_err());
        assert!(parse_plan(r#"{"unrelated": true}"#, "x", Vec::new()).is_err());
    }
}
