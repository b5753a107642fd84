//! Message normalization applied before every request.
//!
//! The caller supplies a fresh system prompt per request, so stale system
//! messages are stripped from history. The remaining rules paper over model
//! quirks: reasoning-only assistant turns, and `gpt-oss` builds that emit
//! tool calls with a null content field.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use deskagent_core::{Message, Role};

static GPT_OSS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)gpt-oss-(20b|120b)").unwrap_or_else(|_| unreachable!("static pattern"))
});

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert history into the wire `messages` array, applying the
/// normalization rules. Internal fields (`id`, `created_at`) never leak.
pub fn prepare_messages(messages: &[Message], model: &str) -> Vec<Value> {
    let needs_tool_content_fill = GPT_OSS.is_match(model);
    let mut wire = Vec::with_capacity(messages.len());

    for message in messages {
        if message.role == Role::System {
            continue;
        }

        let mut content = message.content.clone();

        if message.role == Role::Assistant {
            if content.is_empty() {
                if let Some(reasoning) = &message.reasoning_content {
                    if !reasoning.is_empty() {
                        content = reasoning.clone();
                    }
                }
            }

            if needs_tool_content_fill && content.is_empty() && message.has_tool_calls() {
                let names: Vec<&str> = message
                    .tool_calls
                    .as_ref()
                    .map(|calls| {
                        calls
                            .iter()
                            .map(|call| call.function.name.as_str())
                            .collect()
                    })
                    .unwrap_or_default();
                content = format!("Calling tools: {}", names.join(", "));
            }
        }

        let mut entry = json!({
            "role": role_str(message.role),
            "content": content,
        });

        if let Some(tool_call_id) = &message.tool_call_id {
            entry["tool_call_id"] = json!(tool_call_id);
        }

        if let Some(tool_calls) = &message.tool_calls {
            if !tool_calls.is_empty() {
                entry["tool_calls"] = json!(tool_calls);
            }
        }

        wire.push(entry);
    }

    wire
}
