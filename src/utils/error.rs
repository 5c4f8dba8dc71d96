//! Error handling for Batchloader

use std::time::Duration;
use thiserror::Error;

/// Main error type for Batchloader
#[derive(Debug, Error)]
pub enum BatchloaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

/// Terminal outcome of a single failed transfer.
///
/// Kept `Clone` so a task can hold on to its error and still hand a copy to
/// its completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transfer timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Invalid response status: {status}")]
    InvalidResponse { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Transfer aborted: {0}")]
    Aborted(String),
}

impl TransferError {
    /// True when the transfer ended because somebody asked it to.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        TransferError::Network(err.to_string())
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}
