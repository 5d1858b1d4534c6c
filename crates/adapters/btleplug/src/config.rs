//! Hardware radio configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration of the btleplug-backed radio.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BtleplugConfig {
    /// Index of the host adapter to use, in the order the platform lists
    /// them.
    pub adapter_index: usize,
    /// Give up on a link attempt after this many seconds.
    pub connect_timeout_secs: u64,
}

impl Default for BtleplugConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            connect_timeout_secs: 10,
        }
    }
}

impl BtleplugConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
