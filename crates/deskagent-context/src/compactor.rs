use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use deskagent_core::{Message, Role};
use deskagent_llm::{ChatClient, ChatOptions, LlmError};

/// Fewer non-system messages than this and there is nothing worth
/// summarizing.
pub const MIN_COMPACTABLE_MESSAGES: usize = 5;

/// Each message is clipped to this many characters in the compaction prompt.
const MESSAGE_TRUNCATE_CHARS: usize = 3000;

const MAX_SUMMARY_TOKENS: u32 = 2000;

const COMPACT_SYSTEM_PROMPT: &str = r#"You compress an assistant work session into a handover summary.

Produce a markdown document with EXACTLY this structure:

## Session Context
### Goal
### Status
### Key Decisions
### Constraints Learned
### Files Modified
### Active Tasks
### Technical Notes
### Next Steps

Rules:
- Keep every section heading, even if its body is a single dash.
- Be specific: file paths, command names, error messages.
- At most 2000 tokens of output.
- Write in the same language as the conversation."#;

#[derive(Debug, Error)]
pub enum CompactError {
    #[error("insufficient messages")]
    InsufficientMessages,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

#[derive(Debug, Clone)]
pub struct CompactOutcome {
    pub summary: String,
    /// The synthetic (user, assistant) pair that replaces the compacted
    /// history.
    pub replacement: (Message, Message),
    pub messages_compacted: usize,
}

/// Summarizes a conversation into a compact synthetic history via one LLM
/// call.
pub struct Compactor {
    client: Arc<dyn ChatClient>,
}

impl Compactor {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }

    pub async fn compact(
        &self,
        messages: &[Message],
        working_directory: &Path,
        model: &str,
        cancel: CancellationToken,
    ) -> Result<CompactOutcome, CompactError> {
        let non_system = messages
            .iter()
            .filter(|message| message.role != Role::System)
            .count();
        if non_system < MIN_COMPACTABLE_MESSAGES {
            return Err(CompactError::InsufficientMessages);
        }

        let prompt = build_compact_prompt(messages, working_directory, model);
        let options = ChatOptions {
            model: model.to_string(),
            temperature: 0.3,
            max_tokens: Some(MAX_SUMMARY_TOKENS),
            tool_choice: None,
            cancel,
        };

        let completion = self
            .client
            .chat(COMPACT_SYSTEM_PROMPT, &[Message::user(prompt)], &[], &options)
            .await?;

        let summary = completion.content.trim().to_string();
        log::info!(
            "Compacted {non_system} messages into a {} char summary",
            summary.len()
        );

        Ok(CompactOutcome {
            replacement: replacement_pair(&summary, working_directory),
            summary,
            messages_compacted: non_system,
        })
    }
}

fn build_compact_prompt(messages: &[Message], working_directory: &Path, model: &str) -> String {
    let mut transcript = String::new();
    for message in messages {
        let tag = match message.role {
            Role::System => continue,
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::Tool => "TOOL_RESULT",
        };
        transcript.push_str(&format!(
            "[{tag}] {}\n",
            truncate_chars(&message.content, MESSAGE_TRUNCATE_CHARS)
        ));
    }

    format!(
        "Working Directory: {}\nModel: {model}\n\nConversation to compact:\n```\n{transcript}```",
        working_directory.display()
    )
}

fn replacement_pair(summary: &str, working_directory: &Path) -> (Message, Message) {
    let user = Message::user(format!(
        "[SESSION CONTEXT - Previous conversation was compacted]\n\n{summary}\n\n---\nWorking Directory: {}",
        working_directory.display()
    ));
    let assistant = Message::assistant(
        "Understood. I have the session context and will continue from here.",
        None,
    );
    (user, assistant)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{clipped}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use deskagent_core::ToolSchema;
    use deskagent_llm::{ChatCompletion, Result as LlmResult};
    use std::sync::Mutex;

    /// Client that returns one canned summary and records the prompt.
    struct CannedClient {
        summary: String,
        seen_prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatClient for CannedClient {
        async fn chat(
            &self,
            _system_prompt: &str,
            messages: &[Message],
            _tools: &[ToolSchema],
            _options: &ChatOptions,
        ) -> LlmResult<ChatCompletion> {
            if let Ok(mut prompts) = self.seen_prompts.lock() {
                prompts.push(messages[0].content.clone());
            }
            Ok(ChatCompletion {
                content: self.summary.clone(),
                ..Default::default()
            })
        }

        async fn chat_stream(
            &self,
            _system_prompt: &str,
            _messages: &[Message],
            _tools: &[ToolSchema],
            _options: &ChatOptions,
        ) -> LlmResult<deskagent_llm::LlmStream> {
            unimplemented!("not used by the compactor")
        }
    }

    fn conversation(len: usize) -> Vec<Message> {
        (0..len)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("request {i}"))
                } else {
                    Message::assistant(format!("answer {i}"), None)
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn refuses_short_conversations() {
        let compactor = Compactor::new(Arc::new(CannedClient {
            summary: String::new(),
            seen_prompts: Mutex::new(Vec::new()),
        }));

        let error = compactor
            .compact(
                &conversation(4),
                Path::new("/work"),
                "m",
                CancellationToken::new(),
            )
            .await
            .expect_err("4 messages is below the minimum");

        assert!(matches!(error, CompactError::InsufficientMessages));
    }

    #[tokio::test]
    async fn system_messages_do_not_count_toward_the_minimum() {
        let mut messages = conversation(4);
        messages.insert(0, Message::system("prompt"));

        let compactor = Compactor::new(Arc::new(CannedClient {
            summary: String::new(),
            seen_prompts: Mutex::new(Vec::new()),
        }));

        let error = compactor
            .compact(
                &messages,
                Path::new("/work"),
                "m",
                CancellationToken::new(),
            )
            .await
            .expect_err("still only 4 non-system messages");
        assert!(matches!(error, CompactError::InsufficientMessages));
    }

    #[tokio::test]
    async fn replacement_pair_follows_the_fixed_format() {
        let client = Arc::new(CannedClient {
            summary: "## Session Context\n### Goal\nShip it".to_string(),
            seen_prompts: Mutex::new(Vec::new()),
        });
        let compactor = Compactor::new(Arc::clone(&client) as Arc<dyn deskagent_llm::ChatClient>);

        let outcome = compactor
            .compact(
                &conversation(6),
                Path::new("/work/project"),
                "qwen3-32b",
                CancellationToken::new(),
            )
            .await
            .expect("compact should succeed");

        assert_eq!(outcome.messages_compacted, 6);

        let (user, assistant) = &outcome.replacement;
        assert_eq!(user.role, Role::User);
        assert!(user
            .content
            .starts_with("[SESSION CONTEXT - Previous conversation was compacted]"));
        assert!(user.content.contains("## Session Context"));
        assert!(user.content.ends_with("Working Directory: /work/project"));

        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(
            assistant.content,
            "Understood. I have the session context and will continue from here."
        );

        // The prompt carried the working directory, model id and a fenced
        // transcript.
        let prompts = client.seen_prompts.lock().unwrap();
        assert!(prompts[0].contains("Working Directory: /work/project"));
        assert!(prompts[0].contains("Model: qwen3-32b"));
        assert!(prompts[0].contains("```"));
        assert!(prompts[0].contains("[USER] request 0"));
    }

    #[tokio::test]
    async fn long_messages_are_clipped_in_the_prompt() {
        let client = Arc::new(CannedClient {
            summary: "## Session Context".to_string(),
            seen_prompts: Mutex::new(Vec::new()),
        });
        let compactor = Compactor::new(Arc::clone(&client) as Arc<dyn deskagent_llm::ChatClient>);

        let mut messages = conversation(5);
        messages.push(Message::user("x".repeat(10_000)));

        compactor
            .compact(
                &messages,
                Path::new("/work"),
                "m",
                CancellationToken::new(),
            )
            .await
            .expect("compact should succeed");

        let prompts = client.seen_prompts.lock().unwrap();
        assert!(!prompts[0].contains(&"x".repeat(3001)));
        assert!(prompts[0].contains(&format!("{}...", "x".repeat(3000))));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "한글 텍스트 메시지".repeat(1000);
        let clipped = truncate_chars(&text, 100);
        assert!(clipped.ends_with("..."));
        assert_eq!(clipped.chars().count(), 103);
    }
}
