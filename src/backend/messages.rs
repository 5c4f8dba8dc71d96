use crate::downloader::{GroupId, SpeedTier, TaskId};
use crate::queue::GroupEvent;
use crate::utils::error::{BatchloaderError, TransferError};
use reqwest::Url;
use std::path::{Path, PathBuf};

/// One source to fetch and where to put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    pub source: String,
    pub destination: PathBuf,
}

impl TransferSpec {
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Derive the destination from the last path segment of `url`.
    ///
    /// URLs without a usable file name get `download-<index>`.
    pub fn from_url(url: &str, dir: &Path, index: usize) -> Result<Self, BatchloaderError> {
        let parsed = Url::parse(url).map_err(|e| BatchloaderError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BatchloaderError::InvalidUrl(format!(
                "{url}: unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
            .map(str::to_string)
            .unwrap_or_else(|| format!("download-{index}"));

        Ok(Self::new(url, dir.join(name)))
    }
}

/// Commands sent from the front end to the backend
#[derive(Debug, Clone)]
pub enum BackendCommand {
    /// Queue a new group; `priority` puts it at the front
    Submit {
        transfers: Vec<TransferSpec>,
        priority: bool,
        tier: Option<SpeedTier>,
    },
    /// Cancel every task of a group and drop it from the queue
    Cancel(GroupId),
    Boost(GroupId),
    Throttle(GroupId),
    // System
    Shutdown,
}

/// Events sent from the backend to the front end
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// Sent before the group is queued, so it precedes all of its other events
    GroupAdmitted {
        group: GroupId,
        tasks: usize,
        priority: bool,
    },
    TaskFinished {
        group: GroupId,
        task: TaskId,
        source: String,
        error: Option<TransferError>,
    },
    /// Lifecycle event of any group
    Group(GroupEvent),

    // System
    Error(String),
}
