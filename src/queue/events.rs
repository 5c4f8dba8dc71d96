use crate::downloader::group::GroupId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle transitions a task group announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupEventKind {
    Started,
    Stopped,
    Paused,
    Completed,
    Failed,
}

impl GroupEventKind {
    pub const ALL: [GroupEventKind; 5] = [
        GroupEventKind::Started,
        GroupEventKind::Stopped,
        GroupEventKind::Paused,
        GroupEventKind::Completed,
        GroupEventKind::Failed,
    ];

    /// Stable channel name shared by publishers and subscribers
    pub fn channel_name(&self) -> &'static str {
        match self {
            GroupEventKind::Started => "batchloader.group.started",
            GroupEventKind::Stopped => "batchloader.group.stopped",
            GroupEventKind::Paused => "batchloader.group.paused",
            GroupEventKind::Completed => "batchloader.group.completed",
            GroupEventKind::Failed => "batchloader.group.failed",
        }
    }

    /// Events after which a group leaves the queue
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GroupEventKind::Stopped | GroupEventKind::Completed | GroupEventKind::Failed
        )
    }
}

/// A lifecycle event tagged with the group that emitted it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEvent {
    pub group: GroupId,
    pub kind: GroupEventKind,
    pub timestamp: DateTime<Utc>,
}

impl GroupEvent {
    pub fn new(group: GroupId, kind: GroupEventKind) -> Self {
        Self {
            group,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn channel_name(&self) -> &'static str {
        self.kind.channel_name()
    }
}

/// Receiver of group lifecycle events
///
/// Implement the per-event hooks you care about, or override `on_event` to
/// see every event in one place. Calls are made from the event bus
/// dispatcher, one event at a time, never from inside a group's control call.
#[async_trait]
pub trait GroupListener: Send + Sync {
    async fn group_started(&self, _group: GroupId) {}

    async fn group_stopped(&self, _group: GroupId) {}

    async fn group_paused(&self, _group: GroupId) {}

    async fn group_completed(&self, _group: GroupId) {}

    async fn group_failed(&self, _group: GroupId) {}

    /// Route an event to the matching hook
    async fn on_event(&self, event: &GroupEvent) {
        match event.kind {
            GroupEventKind::Started => self.group_started(event.group).await,
            GroupEventKind::Stopped => self.group_stopped(event.group).await,
            GroupEventKind::Paused => self.group_paused(event.group).await,
            GroupEventKind::Completed => self.group_completed(event.group).await,
            GroupEventKind::Failed => self.group_failed(event.group).await,
        }
    }
}
