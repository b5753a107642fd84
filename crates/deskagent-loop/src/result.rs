use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use deskagent_core::{Message, Role};

/// What `run_agent` hands back to the worker host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub success: bool,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub messages: Vec<Message>,
}

impl AgentRunResult {
    pub fn succeeded(response: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            success: true,
            response: response.into(),
            error: None,
            messages,
        }
    }

    pub fn failed(error: impl Into<String>, messages: Vec<Message>) -> Self {
        let error = error.into();
        Self {
            success: false,
            response: error.clone(),
            error: Some(error),
            messages,
        }
    }
}

/// Remove parse-failure hint turns before the history is returned.
///
/// The hints only help the immediate retry; carried into later sessions they
/// pollute the context. Drops every tool message whose id is in `failed_ids`
/// and every assistant message whose tool calls are all failed ones.
pub fn strip_parse_failure_turns(
    messages: Vec<Message>,
    failed_ids: &HashSet<String>,
) -> Vec<Message> {
    if failed_ids.is_empty() {
        return messages;
    }

    messages
        .into_iter()
        .filter(|message| match message.role {
            Role::Tool => message
                .tool_call_id
                .as_ref()
                .map(|id| !failed_ids.contains(id))
                .unwrap_or(true),
            Role::Assistant => {
                match &message.tool_calls {
                    Some(calls) if !calls.is_empty() => {
                        !calls.iter().all(|call| failed_ids.contains(&call.id))
                    }
                    _ => true,
                }
            }
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskagent_core::ToolCall;

    fn call_with_id(id: &str) -> ToolCall {
        let mut call = ToolCall::new("write_todos", "not json");
        call.id = id.to_string();
        call
    }

    #[test]
    fn stripping_removes_hint_turn_pairs() {
        let mut failed = HashSet::new();
        failed.insert("call_bad".to_string());

        let messages = vec![
            Message::user("go"),
            Message::assistant("", Some(vec![call_with_id("call_bad")])),
            Message::tool_result("call_bad", "Your tool call arguments were not valid JSON."),
            Message::assistant("", Some(vec![call_with_id("call_good")])),
            Message::tool_result("call_good", "done"),
        ];

        let stripped = strip_parse_failure_turns(messages, &failed);
        assert_eq!(stripped.len(), 3);
        assert!(stripped
            .iter()
            .all(|m| m.tool_call_id.as_deref() != Some("call_bad")));
    }

    #[test]
    fn assistant_with_a_surviving_call_is_kept() {
        let mut failed = HashSet::new();
        failed.insert("call_bad".to_string());

        let messages = vec![Message::assistant(
            "",
            Some(vec![call_with_id("call_bad"), call_with_id("call_good")]),
        )];

        let stripped = strip_parse_failure_turns(messages, &failed);
        assert_eq!(stripped.len(), 1);
    }

    #[test]
    fn empty_failure_set_is_a_no_op() {
        let messages = vec![Message::user("go")];
        let stripped = strip_parse_failure_turns(messages.clone(), &HashSet::new());
        assert_eq!(stripped.len(), messages.len());
    }
}
