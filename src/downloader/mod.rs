//! Download tasks and the groups that run them

pub mod group;
pub mod speed;
pub mod task;

// Re-export for convenience
pub use group::{GroupId, GroupOptions, GroupPhase, TaskGroup};
pub use speed::{SpeedTier, TierLimits};
pub use task::{DownloadTask, TaskCompletion, TaskId, TaskResult, TaskState};
