//! Batchloader library
//!
//! Runs batches of download tasks one group at a time: each [`TaskGroup`]
//! transfers its tasks under a bounded concurrency cap, and the
//! [`QueueManager`] keeps exactly one group running while the rest wait.

pub mod backend;
pub mod downloader;
pub mod fetch;
pub mod queue;
pub mod utils;

// Re-export main types for easier use
pub use downloader::{DownloadTask, GroupId, GroupOptions, SpeedTier, TaskGroup, TaskState};
pub use fetch::{Fetcher, HttpFetcher};
pub use queue::{EventBus, GroupEvent, GroupEventKind, GroupListener, QueueManager};
pub use utils::{AppSettings, BatchloaderError, TransferError};
