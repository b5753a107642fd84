use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tools::ToolCall;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation message.
///
/// `tool_call_id` is only meaningful for `role=tool` messages and must name a
/// `ToolCall::id` of an earlier assistant message; [`validate_tool_messages`]
/// drops messages that break that pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "generate_id", skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Chain-of-thought text some providers return alongside `content`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            reasoning_content: None,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            tool_calls,
            ..Self::base(Role::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::base(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .map(|calls| !calls.is_empty())
            .unwrap_or(false)
    }
}

/// Drop `role=tool` messages whose `tool_call_id` does not name a tool call of
/// an earlier assistant message. Idempotent: running it on its own output is a
/// no-op.
pub fn validate_tool_messages(messages: &[Message]) -> Vec<Message> {
    let mut seen_call_ids: HashSet<String> = HashSet::new();
    let mut valid = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::Assistant => {
                if let Some(calls) = &message.tool_calls {
                    for call in calls {
                        seen_call_ids.insert(call.id.clone());
                    }
                }
                valid.push(message.clone());
            }
            Role::Tool => {
                let paired = message
                    .tool_call_id
                    .as_ref()
                    .map(|id| seen_call_ids.contains(id))
                    .unwrap_or(false);

                if paired {
                    valid.push(message.clone());
                } else {
                    log::warn!(
                        "Dropping orphan tool message (tool_call_id: {:?})",
                        message.tool_call_id
                    );
                }
            }
            _ => valid.push(message.clone()),
        }
    }

    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FunctionCall;

    fn assistant_with_call(call_id: &str) -> Message {
        Message::assistant(
            "",
            Some(vec![ToolCall {
                id: call_id.to_string(),
                tool_type: "function".to_string(),
                function: FunctionCall {
                    name: "read_file".to_string(),
                    arguments: "{}".to_string(),
                },
            }]),
        )
    }

    #[test]
    fn validate_keeps_paired_tool_messages() {
        let messages = vec![
            Message::user("hi"),
            assistant_with_call("call_1"),
            Message::tool_result("call_1", "ok"),
        ];

        let valid = validate_tool_messages(&messages);
        assert_eq!(valid.len(), 3);
    }

    #[test]
    fn validate_drops_orphan_tool_messages() {
        let messages = vec![
            Message::user("hi"),
            Message::tool_result("call_missing", "ok"),
        ];

        let valid = validate_tool_messages(&messages);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].role, Role::User);
    }

    #[test]
    fn validate_drops_tool_message_preceding_its_assistant() {
        let messages = vec![
            Message::tool_result("call_1", "out of order"),
            assistant_with_call("call_1"),
        ];

        let valid = validate_tool_messages(&messages);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].role, Role::Assistant);
    }

    #[test]
    fn validate_is_idempotent() {
        let messages = vec![
            Message::user("hi"),
            assistant_with_call("call_1"),
            Message::tool_result("call_1", "ok"),
            Message::tool_result("call_2", "orphan"),
        ];

        let once = validate_tool_messages(&messages);
        let twice = validate_tool_messages(&once);

        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.id, b.id);
        }
    }

    #[test]
    fn tool_message_without_id_is_dropped() {
        let mut message = Message::base(Role::Tool, "dangling");
        message.tool_call_id = None;

        let valid = validate_tool_messages(&[message]);
        assert!(valid.is_empty());
    }
}
