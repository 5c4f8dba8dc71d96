//! Concurrency tiers for a task group

use serde::{Deserialize, Serialize};

/// Default number of parallel transfers on the high tier
pub const DEFAULT_HIGH_CONCURRENCY: usize = 8;

/// Default number of parallel transfers on the low tier
pub const DEFAULT_LOW_CONCURRENCY: usize = 4;

/// Named concurrency cap of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedTier {
    #[default]
    Low,
    High,
}

impl SpeedTier {
    /// Get string representation for display
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedTier::Low => "low",
            SpeedTier::High => "high",
        }
    }
}

/// Parallel transfer counts behind each tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub low: usize,
    pub high: usize,
}

impl TierLimits {
    pub fn new(low: usize, high: usize) -> Self {
        Self { low, high }.sanitized()
    }

    /// Clamp both tiers to at least one transfer and keep `high >= low`
    pub fn sanitized(self) -> Self {
        let low = self.low.max(1);
        let high = self.high.max(low);
        Self { low, high }
    }

    /// Cap that applies for the given tier
    pub fn limit(&self, tier: SpeedTier) -> usize {
        match tier {
            SpeedTier::Low => self.low,
            SpeedTier::High => self.high,
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            low: DEFAULT_LOW_CONCURRENCY,
            high: DEFAULT_HIGH_CONCURRENCY,
        }
    }
}
