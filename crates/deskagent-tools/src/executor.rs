use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use deskagent_core::{AgentIO, ApprovalOutcome, FileEditPreview, RunHandle, ToolCall, ToolOutcome};

use crate::catalog::NO_APPROVAL_TOOLS;
use crate::registry::ToolRegistry;

/// How long a supervised call waits for the user before the approval is
/// treated as rejected.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Minimum time the edit diff stays on screen before the approval prompt.
const EDIT_PREVIEW_PAUSE: Duration = Duration::from_secs(1);

/// Everything a handler may touch. Handlers must honor `cancel` promptly and
/// must not outlive the run that produced the context.
pub struct ToolContext {
    pub working_directory: PathBuf,
    pub cancel: CancellationToken,
    pub io: Arc<dyn AgentIO>,
    pub handle: RunHandle,
}

/// Contract for a tool implementation.
///
/// Handlers never panic or return `Err`; every failure is a
/// `ToolOutcome { success: false, .. }` so the loop can feed it back to the
/// model.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolOutcome;
}

/// Per-run execution mode. Supervised mode (`auto_mode == false`) routes
/// gated tools through the approval prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionPolicy {
    pub auto_mode: bool,
}

/// Dispatches one tool call to its handler, applying the approval gate on
/// the way in and normalizing the outcome on the way out.
pub struct SimpleToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl SimpleToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn execute(
        &self,
        call: &ToolCall,
        args: &Value,
        ctx: &ToolContext,
        policy: ExecutionPolicy,
    ) -> ToolOutcome {
        let name = call.function.name.as_str();

        let Some(definition) = self.registry.definition(name) else {
            return ToolOutcome::failure(format!("Unknown or disabled tool: {name}"));
        };

        if needs_approval(name, definition.requires_approval, policy, &ctx.handle) {
            if name == "edit_file" {
                self.preview_file_edit(args, ctx).await;
            }

            match self.prompt_for_approval(name, args, ctx).await {
                ApprovalOutcome::ApprovedOnce => {}
                ApprovalOutcome::ApprovedAlways => {
                    ctx.handle
                        .state()
                        .always_approved_tools
                        .insert(name.to_string());
                }
                outcome => {
                    let comment = outcome
                        .rejection_comment()
                        .unwrap_or("rejected")
                        .to_string();
                    log::info!("Tool '{name}' rejected by user: {comment}");
                    return ToolOutcome::failure(format!(
                        "Tool execution rejected by user: {comment}"
                    ));
                }
            }
        }

        let Some(handler) = self.registry.handler(name) else {
            return ToolOutcome::failure(format!("No handler installed for tool: {name}"));
        };

        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                ToolOutcome::failure(format!("Tool '{name}' aborted"))
            }
            outcome = handler.run(args.clone(), ctx) => outcome,
        }
    }

    async fn prompt_for_approval(
        &self,
        name: &str,
        args: &Value,
        ctx: &ToolContext,
    ) -> ApprovalOutcome {
        let request_id = Uuid::new_v4().to_string();
        let prompt =
            ctx.io
                .request_approval(request_id, name.to_string(), args.clone(), None);

        match tokio::time::timeout(APPROVAL_TIMEOUT, prompt).await {
            Ok(outcome) => outcome,
            Err(_) => ApprovalOutcome::Timeout,
        }
    }

    /// Show the would-be file contents in the UI before asking for approval,
    /// and leave the diff visible for a moment.
    async fn preview_file_edit(&self, args: &Value, ctx: &ToolContext) {
        let Some(path) = args.get("path").and_then(Value::as_str) else {
            return;
        };
        let old_string = args.get("old_string").and_then(Value::as_str).unwrap_or("");
        let new_string = args.get("new_string").and_then(Value::as_str).unwrap_or("");

        let full_path = ctx.working_directory.join(path);
        let original = tokio::fs::read_to_string(&full_path)
            .await
            .unwrap_or_default();
        let updated = original.replacen(old_string, new_string, 1);

        ctx.io
            .send_file_edit(FileEditPreview {
                path: path.to_string(),
                original_content: original,
                new_content: updated,
                language: language_for_path(&full_path).to_string(),
            })
            .await;

        tokio::time::sleep(EDIT_PREVIEW_PAUSE).await;
    }
}

fn needs_approval(
    name: &str,
    requires_approval: bool,
    policy: ExecutionPolicy,
    handle: &RunHandle,
) -> bool {
    if policy.auto_mode || !requires_approval {
        return false;
    }
    if NO_APPROVAL_TOOLS.contains(&name) {
        return false;
    }
    !handle.state().always_approved_tools.contains(name)
}

fn language_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("rs") => "rust",
        Some("py") => "python",
        Some("js") => "javascript",
        Some("ts") => "typescript",
        Some("json") => "json",
        Some("toml") => "toml",
        Some("md") => "markdown",
        Some("html") => "html",
        Some("css") => "css",
        Some("sh") => "shell",
        _ => "text",
    }
}
