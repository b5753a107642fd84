use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use deskagent_core::{render_checklist, TodoItem, TodoStatus, ToolOutcome, UiEvent};

use crate::executor::{ToolContext, ToolHandler};

#[derive(Debug, Deserialize)]
struct IncomingTodo {
    id: String,
    title: String,
    #[serde(default)]
    status: Option<TodoStatus>,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TodoUpdate {
    id: String,
    status: TodoStatus,
    #[serde(default)]
    note: Option<String>,
}

async fn broadcast_todos(ctx: &ToolContext) {
    if ctx.handle.is_stale() {
        return;
    }
    ctx.io
        .broadcast(UiEvent::TodoUpdate {
            todos: ctx.handle.state().todos(),
        })
        .await;
}

/// `write_todos`: replace the whole list.
pub struct WriteTodos;

#[async_trait]
impl ToolHandler for WriteTodos {
    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let incoming: Vec<IncomingTodo> =
            match args.get("todos").cloned().map(serde_json::from_value) {
                Some(Ok(items)) => items,
                _ => return ToolOutcome::failure("Missing or malformed 'todos' parameter"),
            };

        let mut seen = HashSet::new();
        for item in &incoming {
            if !seen.insert(item.id.clone()) {
                return ToolOutcome::failure(format!("Duplicate todo id: {}", item.id));
            }
        }

        let count = incoming.len();
        let items: Vec<TodoItem> = incoming
            .into_iter()
            .map(|item| TodoItem {
                id: item.id,
                title: item.title,
                status: item.status.unwrap_or(TodoStatus::Pending),
                note: item.note,
            })
            .collect();

        ctx.handle.state().set_todos(items);
        broadcast_todos(ctx).await;

        ToolOutcome::ok(format!("TODO list saved ({count} items)"))
    }
}

/// `update_todos`: apply status transitions to existing items.
pub struct UpdateTodos;

#[async_trait]
impl ToolHandler for UpdateTodos {
    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let updates: Vec<TodoUpdate> =
            match args.get("updates").cloned().map(serde_json::from_value) {
                Some(Ok(updates)) => updates,
                _ => return ToolOutcome::failure("Missing or malformed 'updates' parameter"),
            };

        if updates.is_empty() {
            return ToolOutcome::failure("'updates' must not be empty");
        }

        let state = ctx.handle.state();
        let mut applied = 0usize;
        let mut missing = Vec::new();

        for update in updates {
            if state.update_todo(&update.id, update.status, update.note.as_deref()) {
                applied += 1;
            } else {
                missing.push(update.id);
            }
        }

        broadcast_todos(ctx).await;

        if missing.is_empty() {
            ToolOutcome::ok(format!("Updated {applied} todo item(s)"))
        } else {
            ToolOutcome::failure(format!(
                "Unknown todo id(s): {} ({applied} update(s) applied)",
                missing.join(", ")
            ))
        }
    }
}

/// `get_todo_list`: render the current list.
pub struct GetTodoList;

#[async_trait]
impl ToolHandler for GetTodoList {
    async fn run(&self, _args: Value, ctx: &ToolContext) -> ToolOutcome {
        let todos = ctx.handle.state().todos();
        if todos.is_empty() {
            return ToolOutcome::ok("(no todo list)");
        }
        ToolOutcome::ok(render_checklist(&todos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use deskagent_core::{AgentRunState, NullIo};
    use serde_json::json;

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
    async fn write_then_get_round_trips() {
        let ctx = ctx();

        let outcome = WriteTodos
            .run(
                json!({ "todos": [
                    { "id": "1", "title": "look around" },
                    { "id": "2", "title": "fix it", "status": "in_progress" }
                ]}),
                &ctx,
            )
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.result.as_deref(), Some("TODO list saved (2 items)"));

        let listing = GetTodoList.run(json!({}), &ctx).await;
        assert!(listing.success);
        let text = listing.result.unwrap();
        assert!(text.contains("- [ ] look around"));
        assert!(text.contains("- [*] fix it"));
    }

    #[tokio::test]
    async fn write_rejects_duplicate_ids() {
        let ctx = ctx();
        let outcome = WriteTodos
            .run(
                json!({ "todos": [
                    { "id": "1", "title": "a" },
                    { "id": "1", "title": "b" }
                ]}),
                &ctx,
            )
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Duplicate todo id"));
        assert!(ctx.handle.state().todos().is_empty());
    }

    #[tokio::test]
    async fn update_reports_unknown_ids() {
        let ctx = ctx();
        WriteTodos
            .run(json!({ "todos": [{ "id": "1", "title": "a" }] }), &ctx)
            .await;

        let outcome = UpdateTodos
            .run(
                json!({ "updates": [
                    { "id": "1", "status": "completed", "note": "done" },
                    { "id": "9", "status": "failed" }
                ]}),
                &ctx,
            )
            .await;

        assert!(!outcome.success);
        let error = outcome.error.unwrap();
        assert!(error.contains("9"));
        assert!(error.contains("1 update(s) applied"));

        let todos = ctx.handle.state().todos();
        assert_eq!(todos[0].status, TodoStatus::Completed);
        assert_eq!(todos[0].note.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn get_reports_missing_list() {
        let outcome = GetTodoList.run(json!({}), &ctx()).await;
        assert!(outcome.success);
        assert_eq!(outcome.result.as_deref(), Some("(no todo list)"));
    }
}
