//! Simulated radio configuration.

use std::time::Duration;

use serde::Deserialize;

/// Timing of the simulated radio.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Delay between a request and its completion event, in milliseconds.
    pub latency_ms: u64,
    /// Interval between two advertisements of the same peripheral while
    /// scanning, in milliseconds.
    pub advertising_interval_ms: u64,
    /// RSSI drift applied at each advertisement round, in dBm. Zero keeps
    /// the configured RSSI.
    pub rssi_jitter: i16,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            latency_ms: 5,
            advertising_interval_ms: 250,
            rssi_jitter: 0,
        }
    }
}

impl SimulatedConfig {
    #[must_use]
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    #[must_use]
    pub fn advertising_interval(&self) -> Duration {
        Duration::from_millis(self.advertising_interval_ms.max(1))
    }
}
