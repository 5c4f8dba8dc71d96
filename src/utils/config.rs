//! Application configuration

use crate::downloader::speed::{
    SpeedTier, TierLimits, DEFAULT_HIGH_CONCURRENCY, DEFAULT_LOW_CONCURRENCY,
};
use crate::utils::error::BatchloaderError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE: &str = "settings.json";

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Download location
    pub download_location: PathBuf,

    /// Tier a new group starts on
    pub default_tier: SpeedTier,

    /// Parallel transfers on the low tier
    pub low_concurrency: usize,

    /// Parallel transfers on the high tier
    pub high_concurrency: usize,

    /// Abort a single transfer after this many seconds (None = wait forever)
    pub transfer_timeout_secs: Option<u64>,

    /// HTTP request timeout (seconds)
    pub request_timeout_secs: u64,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            download_location: dirs::download_dir().unwrap_or_else(|| PathBuf::from("./downloads")),
            default_tier: SpeedTier::Low,
            low_concurrency: DEFAULT_LOW_CONCURRENCY,
            high_concurrency: DEFAULT_HIGH_CONCURRENCY,
            transfer_timeout_secs: None,
            request_timeout_secs: 30,
            user_agent: format!("batchloader/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl AppSettings {
    /// Default settings file, e.g. `~/.config/batchloader/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("batchloader").join(SETTINGS_FILE))
    }

    /// Load settings from `path` (or the default location).
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(BatchloaderError::from)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: AppSettings = serde_json::from_str(&content)
            .map_err(BatchloaderError::from)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;

        Ok(settings.sanitized())
    }

    /// Write settings as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(BatchloaderError::from)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(BatchloaderError::from)?;
        std::fs::write(path, json)
            .map_err(BatchloaderError::from)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    /// Enforce sane minimums
    pub fn sanitized(mut self) -> Self {
        let limits = self.tier_limits();
        self.low_concurrency = limits.low;
        self.high_concurrency = limits.high;
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = 1;
        }
        if self.transfer_timeout_secs == Some(0) {
            self.transfer_timeout_secs = None;
        }
        self
    }

    pub fn tier_limits(&self) -> TierLimits {
        TierLimits::new(self.low_concurrency, self.high_concurrency)
    }

    pub fn transfer_timeout(&self) -> Option<Duration> {
        self.transfer_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
