//! Worker host and worker manager.
//!
//! Each session ("tab") gets one worker: a tokio task owning its own tool
//! registry, LLM client, context tracker and agent state. The manager
//! creates and supervises workers, routes UI round-trips, fans out config
//! changes, and caches per-session task state.

pub mod host;
pub mod manager;
pub mod protocol;

pub use host::{spawn_worker, WorkerHandle, WorkerSettings};
pub use manager::{CachedTask, ManagerError, UiSink, WorkerManager, MAX_WORKERS};
pub use protocol::{
    decode_frame, encode_frame, CompactContext, CompactReply, MainToWorker, WorkerToMain,
};
