//! Detection and feedback for structurally broken model output: missing tool
//! calls, tool calls written as XML text, unparseable argument JSON, and
//! mangled tool names. Each failure class gets a corrective message and a
//! three-strike budget.

use serde_json::Value;

use deskagent_core::Message;

pub const SOFT_ITERATION_LIMIT: u32 = 50;
pub const NO_TOOL_CALL_LIMIT: u32 = 3;
pub const ARGUMENT_FAILURE_LIMIT: u32 = 3;
pub const FINAL_RESPONSE_FAILURE_LIMIT: u32 = 3;

pub const FINAL_RESPONSE_TOOL: &str = "final_response";

/// Shown when the model keeps producing arguments that are not JSON.
pub const MODEL_JSON_INCAPABLE_MESSAGE: &str =
    "현재 모델이 올바른 JSON tool arguments를 생성하지 못하고 있습니다. 다른 모델로 변경해 주세요.";

pub const WRAP_UP_PROMPT: &str = "This task has been running for many steps. Please wrap up now: \
finish only the essential remaining work and call final_response soon.";

pub const MISSING_TOOL_CALL_FEEDBACK: &str = "Your previous response did not call any tool. Every \
response must be a tool call: use tell_to_user to talk to the user, and call final_response when \
the task is done.";

pub const MALFORMED_TOOL_CALL_FEEDBACK: &str = "Your previous response contained a malformed tool \
call written as text. Never write tool calls inside the message content; emit them through the \
proper tool_calls API field.";

const MALFORMED_MARKUP_TAGS: [&str; 5] = [
    "<tool_call>",
    "<arg_key>",
    "<arg_value>",
    "<xai:function_call>",
    "<parameter name=",
];

/// Heuristic for a tool call the model wrote as markup instead of using the
/// API.
pub fn detect_malformed_tool_markup(content: &str) -> bool {
    MALFORMED_MARKUP_TAGS.iter().any(|tag| content.contains(tag))
}

/// Clean a tool name of trailing garbage and `<|...|>` special tokens.
/// Returns `None` when nothing usable remains.
pub fn sanitize_tool_name(raw: &str) -> Option<String> {
    // Drop special-token spans first; some models leak them after the name.
    let mut cleaned = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("<|") {
        cleaned.push_str(&rest[..start]);
        match rest[start..].find("|>") {
            Some(end) => rest = &rest[start + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }
    cleaned.push_str(rest);

    let trimmed = cleaned.trim();
    let name: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Parse tool-call argument text. Empty input counts as `{}`.
pub fn parse_tool_arguments(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(trimmed).map_err(|error| error.to_string())
}

const JSON_CORRECTIONS: &str = "\
Required corrections:
1. Use double quotes for all keys and string values
2. No trailing commas
3. No comments inside the JSON
4. Escape special characters in strings (\\n, \\\", \\\\)
5. No XML or other markup, only a single JSON object";

/// Feedback fed back as a tool result after an argument parse failure.
pub fn parse_failure_feedback(raw: &str, error: &str) -> String {
    let preview: String = raw.chars().take(300).collect();
    format!(
        "Your tool call arguments were not valid JSON.\n\
         Received (first 300 chars): {preview}\n\
         Parse error: {error}\n\n{JSON_CORRECTIONS}"
    )
}

/// Feedback after a schema validation failure.
pub fn schema_failure_feedback(hint: &str) -> String {
    format!(
        "Your tool call arguments did not match the tool's schema.\n\
         Problem: {hint}\n\n{JSON_CORRECTIONS}"
    )
}

/// Context-length rollback: drop the last assistant-with-tool-calls message
/// and everything after it (its tool results).
pub fn rollback_last_tool_group(messages: &mut Vec<Message>) {
    if let Some(index) = messages.iter().rposition(Message::has_tool_calls) {
        let dropped = messages.len() - index;
        messages.truncate(index);
        log::info!("Rolled back {dropped} message(s) after context-length error");
    }
}
