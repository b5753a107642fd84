//! Built-in handlers for the always-enabled tool groups.

pub mod communication;
pub mod todo;

use std::sync::Arc;

use crate::registry::ToolRegistry;

/// Install the handlers backing the `communication` and `todo` groups.
/// Optional-group handlers are injected by the host.
pub fn install_builtin_handlers(registry: &ToolRegistry) {
    let pairs: [(&str, Arc<dyn crate::executor::ToolHandler>); 6] = [
        ("tell_to_user", Arc::new(communication::TellToUser)),
        ("ask_to_user", Arc::new(communication::AskToUser)),
        ("final_response", Arc::new(communication::FinalResponse)),
        ("write_todos", Arc::new(todo::WriteTodos)),
        ("update_todos", Arc::new(todo::UpdateTodos)),
        ("get_todo_list", Arc::new(todo::GetTodoList)),
    ];

    for (name, handler) in pairs {
        // The built-in names are always in the catalog.
        let _ = registry.set_handler(name, handler);
    }
}
