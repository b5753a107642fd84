use deskagent_core::{ContextUsage, Message};
use deskagent_llm::ChatUsage;

/// Fraction of the context window at which preventative compaction kicks in.
pub const AUTO_COMPACT_THRESHOLD: f32 = 0.70;

/// Rough chars-per-token divisor, matching the usual 4-chars heuristic.
const CHARS_PER_TOKEN: usize = 4;

/// Heuristic token estimate over the system prompt plus message contents.
pub fn estimate_tokens(system_prompt: &str, messages: &[Message]) -> u32 {
    let mut chars = system_prompt.chars().count();
    for message in messages {
        chars += message.content.chars().count();
        if let Some(calls) = &message.tool_calls {
            for call in calls {
                chars += call.function.name.chars().count();
                chars += call.function.arguments.chars().count();
            }
        }
    }
    (chars / CHARS_PER_TOKEN) as u32
}

/// Running token estimate for one session's conversation.
///
/// The auto-compact trigger is one-shot: once it fires it stays quiet until
/// the next [`ContextTracker::reset`], so a failed compaction does not loop.
#[derive(Debug, Default)]
pub struct ContextTracker {
    current_tokens: u32,
    triggered: bool,
}

impl ContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the estimate after an LLM response, preferring the provider's
    /// reported usage over the character heuristic.
    pub fn record(
        &mut self,
        usage: Option<&ChatUsage>,
        system_prompt: &str,
        messages: &[Message],
    ) {
        self.current_tokens = match usage {
            Some(usage) if usage.total_tokens > 0 => usage.total_tokens,
            _ => estimate_tokens(system_prompt, messages),
        };
    }

    pub fn current_tokens(&self) -> u32 {
        self.current_tokens
    }

    pub fn usage(&self, max_tokens: u32) -> ContextUsage {
        let percentage = if max_tokens == 0 {
            0.0
        } else {
            (self.current_tokens as f32 / max_tokens as f32) * 100.0
        };
        ContextUsage {
            current_tokens: self.current_tokens,
            max_tokens,
            usage_percentage: percentage,
        }
    }

    /// True exactly once per threshold crossing.
    pub fn should_trigger_auto_compact(&mut self, max_tokens: u32) -> bool {
        if self.triggered || max_tokens == 0 {
            return false;
        }

        let crossed =
            self.current_tokens as f32 >= max_tokens as f32 * AUTO_COMPACT_THRESHOLD;
        if crossed {
            self.triggered = true;
        }
        crossed
    }

    /// Re-arm the trigger after a compaction replaced the history.
    pub fn reset(&mut self, new_estimate: u32) {
        self.current_tokens = new_estimate;
        self.triggered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_counts_content_and_tool_calls() {
        let messages = vec![
            Message::user("a".repeat(400)),
            Message::assistant("", Some(vec![deskagent_core::ToolCall::new(
                "read_file",
                "{\"path\":\"x\"}",
            )])),
        ];

        let estimate = estimate_tokens("s".repeat(40).as_str(), &messages);
        // 40 + 400 + len("read_file") + len(args), divided by 4.
        assert!(estimate >= 110, "estimate too low: {estimate}");
    }

    #[test]
    fn prefers_provider_usage_when_present() {
        let mut tracker = ContextTracker::new();
        let usage = ChatUsage {
            prompt_tokens: 900,
            completion_tokens: 100,
            total_tokens: 1000,
        };

        tracker.record(Some(&usage), "prompt", &[Message::user("hi")]);
        assert_eq!(tracker.current_tokens(), 1000);
    }

    #[test]
    fn falls_back_to_estimate_without_usage() {
        let mut tracker = ContextTracker::new();
        tracker.record(None, "", &[Message::user("a".repeat(800))]);
        assert_eq!(tracker.current_tokens(), 200);
    }

    #[test]
    fn usage_percentage_is_relative_to_max() {
        let mut tracker = ContextTracker::new();
        tracker.reset(64_000);

        let usage = tracker.usage(128_000);
        assert_eq!(usage.current_tokens, 64_000);
        assert!((usage.usage_percentage - 50.0).abs() < 0.01);
    }

    #[test]
    fn trigger_fires_once_per_crossing() {
        let mut tracker = ContextTracker::new();
        tracker.reset(0);

        tracker.record(
            Some(&ChatUsage {
                total_tokens: 90_000,
                ..Default::default()
            }),
            "",
            &[],
        );

        assert!(tracker.should_trigger_auto_compact(128_000));
        // Still over the threshold, but already fired.
        assert!(!tracker.should_trigger_auto_compact(128_000));

        tracker.reset(10_000);
        assert!(!tracker.should_trigger_auto_compact(128_000));

        tracker.record(
            Some(&ChatUsage {
                total_tokens: 100_000,
                ..Default::default()
            }),
            "",
            &[],
        );
        assert!(tracker.should_trigger_auto_compact(128_000));
    }

    #[test]
    fn trigger_ignores_zero_window() {
        let mut tracker = ContextTracker::new();
        tracker.reset(1_000_000);
        assert!(!tracker.should_trigger_auto_compact(0));
    }
}
