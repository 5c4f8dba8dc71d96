use crate::utils::error::TransferError;
use async_trait::async_trait;
use std::ops::Range;
use std::path::Path;

/// Status codes that count as a successful transfer
pub const SUCCESS_STATUS: Range<u16> = 200..300;

/// What the transport reported for a finished request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchResponse {
    /// Response status code
    pub status: u16,
    /// Bytes written to the destination
    pub bytes: u64,
}

impl FetchResponse {
    pub fn new(status: u16, bytes: u64) -> Self {
        Self { status, bytes }
    }
}

/// Check a response status against the accepted `[200, 300)` range
pub fn validate_status(status: u16) -> bool {
    SUCCESS_STATUS.contains(&status)
}

/// Transport capability that moves one resource to a local destination
///
/// Implementations report transport failures as `Err`; a response with any
/// status is `Ok`, and the caller decides whether the status is acceptable.
/// Dropping the returned future must abort the transfer.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns a short identifier for logs (e.g., "http")
    fn id(&self) -> &'static str;

    /// Fetch `source` into `destination`
    async fn fetch(&self, source: &str, destination: &Path) -> Result<FetchResponse, TransferError>;
}
