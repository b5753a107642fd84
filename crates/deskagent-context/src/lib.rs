//! Context window management: usage tracking and preventative compaction.

pub mod compactor;
pub mod tracker;

pub use compactor::{CompactError, CompactOutcome, Compactor, MIN_COMPACTABLE_MESSAGES};
pub use tracker::{estimate_tokens, ContextTracker, AUTO_COMPACT_THRESHOLD};
