use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::todo::TodoItem;

/// Approximate context usage reported to the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextUsage {
    pub current_tokens: u32,
    pub max_tokens: u32,
    pub usage_percentage: f32,
}

/// Per-session agent state. Lives for the worker's lifetime; individual runs
/// only reset `run_id`, `is_running` and the cancellation token.
pub struct AgentRunState {
    run_id: AtomicU64,
    is_running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    todos: RwLock<Vec<TodoItem>>,
    pub always_approved_tools: DashSet<String>,
    working_directory: RwLock<PathBuf>,
}

impl AgentRunState {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            run_id: AtomicU64::new(0),
            is_running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            todos: RwLock::new(Vec::new()),
            always_approved_tools: DashSet::new(),
            working_directory: RwLock::new(working_directory.into()),
        }
    }

    /// Start a new run: bump the run id, mark running, install a fresh
    /// cancellation token and optionally clear the TODO list.
    pub fn begin_run(self: &Arc<Self>, clear_todos: bool) -> RunHandle {
        let run_id = self.run_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.is_running.store(true, Ordering::SeqCst);

        let token = CancellationToken::new();
        if let Ok(mut guard) = self.cancel.lock() {
            *guard = token.clone();
        }

        if clear_todos {
            if let Ok(mut todos) = self.todos.write() {
                todos.clear();
            }
        }

        RunHandle {
            run_id,
            token,
            state: Arc::clone(self),
        }
    }

    pub fn finish_run(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn run_id(&self) -> u64 {
        self.run_id.load(Ordering::SeqCst)
    }

    /// Cancel the in-flight run, if any.
    pub fn cancel(&self) {
        if let Ok(guard) = self.cancel.lock() {
            guard.cancel();
        }
    }

    pub fn working_directory(&self) -> PathBuf {
        self.working_directory
            .read()
            .map(|wd| wd.clone())
            .unwrap_or_default()
    }

    pub fn set_working_directory(&self, directory: impl AsRef<Path>) {
        if let Ok(mut wd) = self.working_directory.write() {
            *wd = directory.as_ref().to_path_buf();
        }
    }

    pub fn todos(&self) -> Vec<TodoItem> {
        self.todos
            .read()
            .map(|todos| todos.clone())
            .unwrap_or_default()
    }

    pub fn set_todos(&self, items: Vec<TodoItem>) {
        if let Ok(mut todos) = self.todos.write() {
            *todos = items;
        }
    }

    pub fn clear_todos(&self) {
        self.set_todos(Vec::new());
    }

    /// Apply a status/note update to one item. Returns false if the id is
    /// unknown.
    pub fn update_todo(
        &self,
        id: &str,
        status: crate::todo::TodoStatus,
        note: Option<&str>,
    ) -> bool {
        let Ok(mut todos) = self.todos.write() else {
            return false;
        };
        match todos.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.status = status;
                if let Some(note) = note {
                    item.note = Some(note.to_string());
                }
                true
            }
            None => false,
        }
    }
}

/// Opaque handle passed into callbacks so they can detect staleness: a
/// callback firing after the run id advanced must be ignored.
#[derive(Clone)]
pub struct RunHandle {
    run_id: u64,
    token: CancellationToken,
    state: Arc<AgentRunState>,
}

impl RunHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn is_stale(&self) -> bool {
        self.state.run_id() != self.run_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn state(&self) -> &Arc<AgentRunState> {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::todo::TodoStatus;

    #[test]
    fn begin_run_increments_run_id_and_marks_running() {
        let state = Arc::new(AgentRunState::new("/tmp"));
        assert_eq!(state.run_id(), 0);

        let first = state.begin_run(true);
        assert_eq!(first.run_id(), 1);
        assert!(state.is_running());

        state.finish_run();
        let second = state.begin_run(true);
        assert_eq!(second.run_id(), 2);
        assert!(first.is_stale());
        assert!(!second.is_stale());
    }

    #[test]
    fn cancel_hits_only_the_current_token() {
        let state = Arc::new(AgentRunState::new("/tmp"));
        let first = state.begin_run(true);
        let second = state.begin_run(true);

        state.cancel();
        assert!(second.is_cancelled());
        assert!(!first.is_cancelled());
    }

    #[test]
    fn begin_run_optionally_keeps_todos() {
        let state = Arc::new(AgentRunState::new("/tmp"));
        state.set_todos(vec![TodoItem::pending("1", "keep me")]);

        let _resumed = state.begin_run(false);
        assert_eq!(state.todos().len(), 1);

        let _fresh = state.begin_run(true);
        assert!(state.todos().is_empty());
    }

    #[test]
    fn update_todo_reports_unknown_ids() {
        let state = Arc::new(AgentRunState::new("/tmp"));
        state.set_todos(vec![TodoItem::pending("1", "task")]);

        assert!(state.update_todo("1", TodoStatus::Completed, Some("done")));
        assert!(!state.update_todo("missing", TodoStatus::Failed, None));

        let todos = state.todos();
        assert_eq!(todos[0].status, TodoStatus::Completed);
        assert_eq!(todos[0].note.as_deref(), Some("done"));
    }
}
