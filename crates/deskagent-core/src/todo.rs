use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TodoStatus {
    fn checkbox(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "[ ]",
            TodoStatus::InProgress => "[*]",
            TodoStatus::Completed => "[x]",
            TodoStatus::Failed => "[!]",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoItem {
    pub id: String,
    pub title: String,
    pub status: TodoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TodoItem {
    pub fn pending(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TodoStatus::Pending,
            note: None,
        }
    }
}

/// Render a TODO list as the checkbox lines injected into the turn envelope.
pub fn render_checklist(items: &[TodoItem]) -> String {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let mut line = format!("- {} {}", item.status.checkbox(), item.title);
        if let Some(note) = &item.note {
            if !note.is_empty() {
                line.push_str(&format!(" ({note})"));
            }
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checklist_reflects_statuses() {
        let items = vec![
            TodoItem {
                id: "1".to_string(),
                title: "read the config".to_string(),
                status: TodoStatus::Completed,
                note: None,
            },
            TodoItem {
                id: "2".to_string(),
                title: "apply the patch".to_string(),
                status: TodoStatus::InProgress,
                note: Some("half done".to_string()),
            },
            TodoItem::pending("3", "run tests"),
        ];

        let rendered = render_checklist(&items);
        assert_eq!(
            rendered,
            "- [x] read the config\n- [*] apply the patch (half done)\n- [ ] run tests"
        );
    }

    #[test]
    fn checklist_of_empty_list_is_empty() {
        assert!(render_checklist(&[]).is_empty());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TodoStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
