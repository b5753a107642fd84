use async_trait::async_trait;
use serde_json::Value;

use crate::approval::ApprovalOutcome;
use crate::events::{AskUserRequest, FileEditPreview, UiEvent};

/// The loop's single window to the outside world.
///
/// Workers implement this over the worker→main channel; tests implement it
/// in-process. Round-trip methods (`request_approval`, `ask_user`) block the
/// calling run until the user answers or the implementation times out.
#[async_trait]
pub trait AgentIO: Send + Sync {
    async fn broadcast(&self, event: UiEvent);

    async fn request_approval(
        &self,
        request_id: String,
        tool_name: String,
        arguments: Value,
        reason: Option<String>,
    ) -> ApprovalOutcome;

    async fn ask_user(&self, request_id: String, request: AskUserRequest) -> String;

    async fn send_file_edit(&self, preview: FileEditPreview);

    async fn show_task_window(&self) {}

    async fn flash_windows(&self) {}
}

/// IO sink that approves everything and answers with the first option.
/// Useful as a default collaborator in tests and headless runs.
#[derive(Debug, Default)]
pub struct NullIo;

#[async_trait]
impl AgentIO for NullIo {
    async fn broadcast(&self, _event: UiEvent) {}

    async fn request_approval(
        &self,
        _request_id: String,
        _tool_name: String,
        _arguments: Value,
        _reason: Option<String>,
    ) -> ApprovalOutcome {
        ApprovalOutcome::ApprovedOnce
    }

    async fn ask_user(&self, _request_id: String, request: AskUserRequest) -> String {
        request.default_answer()
    }

    async fn send_file_edit(&self, _preview: FileEditPreview) {}
}
