//! System prompt assembly and the per-turn request rebuild.
//!
//! The loop never sends the raw conversation. Every iteration it rebuilds
//! exactly two messages: the system prompt and one structured user envelope
//! that separates the task list, past turns and the current request. Smaller
//! models confuse past and present without the tags, and rebuilding keeps
//! the rendered TODO statuses current.

use std::path::Path;

use deskagent_core::{render_checklist, Message, Role, TodoItem};
use deskagent_tools::{groups, ToolRegistry};

const PLAN_EXECUTE_PREAMBLE: &str = "\
You are a desktop assistant that completes tasks by calling tools.

Rules:
- Work through the task list one item at a time, updating item statuses with the todo tools.
- Every response MUST be a tool call. Never answer with plain text.
- Never write a tool call as text or XML inside your message content.
- Use tell_to_user for progress notes and ask_to_user when you are blocked on the user.
- When the whole task is finished, call final_response with the final answer. That ends the task.";

const GIT_RULES: &str = "\
GIT RULES:
- The working directory is a git repository. Never run destructive git commands (reset --hard, push --force, clean) unless the user explicitly asked for them.
- Do not commit unless the user asked for a commit.";

const VISION_RULE: &str = "\
VISION VERIFICATION RULE:
- After any action that changes what is on screen, capture a screenshot and verify the result visually before reporting success.";

/// Compose the system prompt: preamble, tool digest, working directory and
/// the conditional rule blocks.
pub fn build_system_prompt(registry: &ToolRegistry, working_directory: &Path) -> String {
    let mut sections = vec![
        PLAN_EXECUTE_PREAMBLE.to_string(),
        registry.summary_for_planning(),
        format!("WORKING DIRECTORY: {}", working_directory.display()),
    ];

    if working_directory.join(".git").exists() {
        sections.push(GIT_RULES.to_string());
    }

    if registry.is_group_enabled(groups::VISION) {
        sections.push(VISION_RULE.to_string());
    }

    sections.join("\n\n")
}

fn role_tag(role: Role) -> &'static str {
    match role {
        Role::System => "SYSTEM",
        Role::User => "USER",
        Role::Assistant => "ASSISTANT",
        Role::Tool => "TOOL_RESULT",
    }
}

fn flatten_message(message: &Message) -> String {
    let mut line = format!("[{}]: {}", role_tag(message.role), message.content);
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            line.push_str(&format!(
                "\n[{} tool_call] {}({})",
                role_tag(message.role),
                call.function.name,
                call.function.arguments
            ));
        }
    }
    line
}

/// Build the single user envelope for one loop iteration.
///
/// `history`, the current user request and the in-loop messages are
/// flattened in order; the very last message is pulled out into
/// `<CURRENT_REQUEST>`.
pub fn build_turn_envelope(
    todos: &[TodoItem],
    history: &[Message],
    user_message: &Message,
    tool_loop: &[Message],
    vision_enabled: bool,
) -> String {
    let mut ordered: Vec<&Message> = history.iter().collect();
    ordered.push(user_message);
    ordered.extend(tool_loop.iter());

    let (past, current) = match ordered.split_last() {
        Some((last, rest)) => (rest, *last),
        None => (&[] as &[&Message], user_message),
    };

    let task_block = if todos.is_empty() {
        "(no task list)".to_string()
    } else {
        render_checklist(todos)
    };

    let history_block = past
        .iter()
        .map(|message| flatten_message(message))
        .collect::<Vec<_>>()
        .join("\n");

    let mut envelope = format!(
        "<CURRENT_TASK>\n{task_block}\n</CURRENT_TASK>\n\n\
         <CONVERSATION_HISTORY>\n{history_block}\n</CONVERSATION_HISTORY>\n\n\
         <CURRENT_REQUEST>\n{}\n</CURRENT_REQUEST>",
        flatten_message(current)
    );

    if vision_enabled {
        envelope.push_str(
            "\n\nREMINDER: verify visible changes with a screenshot before reporting success.",
        );
    }

    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use deskagent_core::{TodoStatus, ToolCall};
    use deskagent_tools::ToolCatalog;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(Arc::new(ToolCatalog::builtin()))
    }

    #[test]
    fn system_prompt_contains_the_fixed_sections() {
        let prompt = build_system_prompt(&registry(), Path::new("/work/project"));

        assert!(prompt.contains("final_response"));
        assert!(prompt.contains("AVAILABLE TOOLS:"));
        assert!(prompt.contains("WORKING DIRECTORY: /work/project"));
        assert!(!prompt.contains("GIT RULES"));
        assert!(!prompt.contains("VISION VERIFICATION RULE"));
    }

    #[test]
    fn git_rules_appear_only_with_a_git_repo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();

        let prompt = build_system_prompt(&registry(), dir.path());
        assert!(prompt.contains("GIT RULES"));
    }

    #[test]
    fn vision_rule_follows_group_state() {
        let registry = registry();
        registry.enable(groups::VISION);
        let prompt = build_system_prompt(&registry, Path::new("/tmp"));
        assert!(prompt.contains("VISION VERIFICATION RULE"));
    }

    #[test]
    fn envelope_separates_history_from_current_request() {
        let history = vec![
            Message::user("first request"),
            Message::assistant("first answer", None),
        ];
        let user = Message::user("second request");

        let envelope = build_turn_envelope(&[], &history, &user, &[], false);

        let history_part = envelope
            .split("<CONVERSATION_HISTORY>")
            .nth(1)
            .and_then(|rest| rest.split("</CONVERSATION_HISTORY>").next())
            .unwrap();
        assert!(history_part.contains("[USER]: first request"));
        assert!(history_part.contains("[ASSISTANT]: first answer"));
        assert!(!history_part.contains("second request"));

        let current_part = envelope.split("<CURRENT_REQUEST>").nth(1).unwrap();
        assert!(current_part.contains("[USER]: second request"));
    }

    #[test]
    fn envelope_promotes_last_tool_result_to_current_request() {
        let user = Message::user("do the thing");
        let call = ToolCall::new("read_file", "{\"path\":\"a\"}");
        let tool_loop = vec![
            Message::assistant("", Some(vec![call])),
            Message::tool_result("call_1", "file contents"),
        ];

        let envelope = build_turn_envelope(&[], &[], &user, &tool_loop, false);
        let current_part = envelope.split("<CURRENT_REQUEST>").nth(1).unwrap();
        assert!(current_part.contains("[TOOL_RESULT]: file contents"));
    }

    #[test]
    fn envelope_renders_current_todo_statuses() {
        let todos = vec![
            TodoItem {
                id: "1".to_string(),
                title: "survey".to_string(),
                status: TodoStatus::Completed,
                note: None,
            },
            TodoItem::pending("2", "implement"),
        ];
        let user = Message::user("go");

        let envelope = build_turn_envelope(&todos, &[], &user, &[], false);
        assert!(envelope.contains("- [x] survey"));
        assert!(envelope.contains("- [ ] implement"));
    }

    #[test]
    fn vision_reminder_is_conditional() {
        let user = Message::user("go");
        assert!(!build_turn_envelope(&[], &[], &user, &[], false).contains("REMINDER"));
        assert!(build_turn_envelope(&[], &[], &user, &[], true).contains("REMINDER"));
    }
}
