//! reqwest-backed fetcher

use crate::fetch::traits::{validate_status, FetchResponse, Fetcher};
use crate::utils::config::AppSettings;
use crate::utils::error::TransferError;
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Streams a GET response body into the destination file
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given user agent and request timeout
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }

    pub fn from_settings(settings: &AppSettings) -> Result<Self> {
        Self::new(&settings.user_agent, settings.request_timeout())
    }

    /// Wrap an already configured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// `<destination>.part`, written first and renamed on success
fn partial_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Removes the partial file on drop unless the download was kept.
///
/// Also covers a transfer aborted mid-stream, which drops the fetch future.
struct PartialFile {
    path: PathBuf,
    keep: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Rename onto `destination` and stop tracking the file
    async fn persist(mut self, destination: &Path) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, destination).await?;
        self.keep = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn id(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, source: &str, destination: &Path) -> Result<FetchResponse, TransferError> {
        debug!("GET {} -> {}", source, destination.display());

        let response = self.client.get(source).send().await?;
        let status = response.status().as_u16();

        if !validate_status(status) {
            warn!("{} answered with status {}", source, status);
            return Ok(FetchResponse::new(status, 0));
        }

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Declared before the writer so the file is closed before removal
        let part = PartialFile::new(partial_path(destination));
        let file = File::create(part.path()).await?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        writer.flush().await?;
        drop(writer);
        part.persist(destination).await?;

        debug!("Fetched {} bytes from {}", written, source);
        Ok(FetchResponse::new(status, written))
    }
}
