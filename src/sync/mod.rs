//! Chunked, resumable downloads with single-flight per tenant.

pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod source;
pub mod types;
pub mod window;

pub use orchestrator::{SyncOrchestrator, SyncSettings};
pub use progress::ProgressStore;
pub use registry::SyncHandle;
pub use source::DataSource;
pub use types::{DownloadCheckpoint, SyncProgress, SyncState, SyncStatus};
