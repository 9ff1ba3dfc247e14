//! Output refresh cadence.

use std::time::Duration;

/// Period of the output pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshInterval(Duration);

impl RefreshInterval {
    /// Used when the bridging interval is unset or zero.
    pub const DEFAULT_MS: u32 = 50;

    /// From the configured bridging interval in milliseconds.
    pub fn from_config(bridging_interval_ms: Option<u32>) -> Self {
        let ms = match bridging_interval_ms {
            Some(ms) if ms > 0 => ms,
            _ => Self::DEFAULT_MS,
        };
        Self(Duration::from_millis(ms as u64))
    }

    pub fn period(&self) -> Duration {
        self.0
    }

    pub fn updates_per_second(&self) -> u32 {
        let ms = self.0.as_millis().max(1) as u32;
        1000 / ms
    }
}

impl Default for RefreshInterval {
    fn default() -> Self {
        Self::from_config(None)
    }
}
