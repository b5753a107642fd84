use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use deskagent_core::{FunctionSchema, ToolSchema};

/// Tool group ids. `communication` and `todo` are always enabled; the rest
/// are optional and toggled per session.
pub mod groups {
    pub const COMMUNICATION: &str = "communication";
    pub const TODO: &str = "todo";
    pub const FILE: &str = "file";
    pub const SHELL: &str = "shell";
    pub const OFFICE: &str = "office";
    pub const BROWSER: &str = "browser";
    pub const VISION: &str = "vision";

    pub const CORE: [&str; 2] = [COMMUNICATION, TODO];
    pub const OPTIONAL: [&str; 5] = [FILE, SHELL, OFFICE, BROWSER, VISION];

    pub fn is_core(group: &str) -> bool {
        CORE.contains(&group)
    }

    pub fn is_known(group: &str) -> bool {
        is_core(group) || OPTIONAL.contains(&group)
    }
}

/// Tools that never hit the approval gate, even in supervised mode.
pub const NO_APPROVAL_TOOLS: [&str; 6] = [
    "tell_to_user",
    "ask_to_user",
    "final_response",
    "write_todos",
    "update_todos",
    "get_todo_list",
];

/// Immutable description of one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub group: String,
    pub requires_approval: bool,
}

impl ToolDefinition {
    fn new(
        name: &str,
        description: &str,
        parameters: Value,
        group: &str,
        requires_approval: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            group: group.to_string(),
            requires_approval,
        }
    }

    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            schema_type: "function".to_string(),
            function: FunctionSchema {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.parameters.clone(),
            },
        }
    }
}

/// The full built-in catalog. Immutable after construction.
pub struct ToolCatalog {
    definitions: Vec<ToolDefinition>,
}

impl ToolCatalog {
    pub fn builtin() -> Self {
        Self {
            definitions: builtin_definitions(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.iter().find(|def| def.name == name)
    }

    pub fn group(&self, group: &str) -> Vec<&ToolDefinition> {
        self.definitions
            .iter()
            .filter(|def| def.group == group)
            .collect()
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn string_param(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn builtin_definitions() -> Vec<ToolDefinition> {
    vec![
        // communication
        ToolDefinition::new(
            "tell_to_user",
            "Send a progress note to the user without ending the task.",
            json!({
                "type": "object",
                "properties": {
                    "message": string_param("The note to display")
                },
                "required": ["message"]
            }),
            groups::COMMUNICATION,
            false,
        ),
        ToolDefinition::new(
            "ask_to_user",
            "Ask the user a question and wait for their answer. Use when a decision or missing detail blocks progress.",
            json!({
                "type": "object",
                "properties": {
                    "question": string_param("The question to display"),
                    "options": {
                        "type": "array",
                        "description": "Suggested answers (optional)",
                        "items": { "type": "string" }
                    },
                    "allow_custom": {
                        "type": "boolean",
                        "description": "Whether a free-form answer is accepted, default true"
                    }
                },
                "required": ["question"]
            }),
            groups::COMMUNICATION,
            false,
        ),
        ToolDefinition::new(
            "final_response",
            "Finish the task and deliver the final answer to the user. Call this exactly once, when everything is done.",
            json!({
                "type": "object",
                "properties": {
                    "message": string_param("The final answer")
                },
                "required": ["message"]
            }),
            groups::COMMUNICATION,
            false,
        ),
        // todo
        ToolDefinition::new(
            "write_todos",
            "Replace the task's TODO list.",
            json!({
                "type": "object",
                "properties": {
                    "todos": {
                        "type": "array",
                        "description": "Ordered list of work items",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string" },
                                "title": { "type": "string" },
                                "status": {
                                    "type": "string",
                                    "enum": ["pending", "in_progress", "completed", "failed"]
                                },
                                "note": { "type": "string" }
                            },
                            "required": ["id", "title"]
                        }
                    }
                },
                "required": ["todos"]
            }),
            groups::TODO,
            false,
        ),
        ToolDefinition::new(
            "update_todos",
            "Update the status (and optionally the note) of existing TODO items.",
            json!({
                "type": "object",
                "properties": {
                    "updates": {
                        "type": "array",
                        "description": "Status transitions to apply",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string" },
                                "status": {
                                    "type": "string",
                                    "enum": ["pending", "in_progress", "completed", "failed"]
                                },
                                "note": { "type": "string" }
                            },
                            "required": ["id", "status"]
                        }
                    }
                },
                "required": ["updates"]
            }),
            groups::TODO,
            false,
        ),
        ToolDefinition::new(
            "get_todo_list",
            "Show the current TODO list with statuses.",
            json!({ "type": "object", "properties": {} }),
            groups::TODO,
            false,
        ),
        // file
        ToolDefinition::new(
            "read_file",
            "Read a text file relative to the working directory.",
            json!({
                "type": "object",
                "properties": {
                    "path": string_param("File path")
                },
                "required": ["path"]
            }),
            groups::FILE,
            false,
        ),
        ToolDefinition::new(
            "write_file",
            "Create or overwrite a text file.",
            json!({
                "type": "object",
                "properties": {
                    "path": string_param("File path"),
                    "content": string_param("Full file content")
                },
                "required": ["path", "content"]
            }),
            groups::FILE,
            true,
        ),
        ToolDefinition::new(
            "edit_file",
            "Replace an exact substring of a file with new text.",
            json!({
                "type": "object",
                "properties": {
                    "path": string_param("File path"),
                    "old_string": string_param("Exact text to replace"),
                    "new_string": string_param("Replacement text")
                },
                "required": ["path", "old_string", "new_string"]
            }),
            groups::FILE,
            true,
        ),
        ToolDefinition::new(
            "list_directory",
            "List the entries of a directory.",
            json!({
                "type": "object",
                "properties": {
                    "path": string_param("Directory path, defaults to the working directory")
                }
            }),
            groups::FILE,
            false,
        ),
        ToolDefinition::new(
            "search_in_files",
            "Search files under the working directory for a pattern.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": string_param("Text or regex to look for"),
                    "glob": string_param("Optional filename filter, e.g. *.rs")
                },
                "required": ["pattern"]
            }),
            groups::FILE,
            false,
        ),
        // shell
        ToolDefinition::new(
            "run_command",
            "Run a shell command in the working directory and return its output.",
            json!({
                "type": "object",
                "properties": {
                    "command": string_param("The command line to run"),
                    "timeout_seconds": {
                        "type": "integer",
                        "description": "Kill the command after this many seconds"
                    }
                },
                "required": ["command"]
            }),
            groups::SHELL,
            true,
        ),
        // office
        ToolDefinition::new(
            "office_open_document",
            "Open a document in the connected office application.",
            json!({
                "type": "object",
                "properties": {
                    "path": string_param("Document path")
                },
                "required": ["path"]
            }),
            groups::OFFICE,
            true,
        ),
        ToolDefinition::new(
            "office_replace_text",
            "Replace text in the currently open office document.",
            json!({
                "type": "object",
                "properties": {
                    "find": string_param("Text to find"),
                    "replace": string_param("Replacement text")
                },
                "required": ["find", "replace"]
            }),
            groups::OFFICE,
            true,
        ),
        // browser
        ToolDefinition::new(
            "browser_navigate",
            "Navigate the managed browser to a URL.",
            json!({
                "type": "object",
                "properties": {
                    "url": string_param("Destination URL")
                },
                "required": ["url"]
            }),
            groups::BROWSER,
            true,
        ),
        ToolDefinition::new(
            "browser_extract",
            "Extract the visible text of the current browser page.",
            json!({ "type": "object", "properties": {} }),
            groups::BROWSER,
            false,
        ),
        // vision
        ToolDefinition::new(
            "capture_screen",
            "Capture a screenshot of the screen for visual verification.",
            json!({ "type": "object", "properties": {} }),
            groups::VISION,
            false,
        ),
    ]
}
