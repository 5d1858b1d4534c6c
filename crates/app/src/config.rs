//! Central and scan configuration.

use std::time::Duration;

use blelink_domain::gatt::{DEFAULT_MTU, MAX_MTU};
use serde::Deserialize;
use uuid::Uuid;

/// Behaviour switches for the central actor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// Stop the scan session once a link is established, so discovery does
    /// not compete with the active connection for airtime.
    pub stop_scan_on_connect: bool,
    /// MTU requested after service discovery.
    pub target_mtu: u16,
    /// List records without a display name in snapshots and list diffs.
    pub list_unnamed_devices: bool,
    /// Capacity of the command channel between handles and the actor.
    pub command_capacity: usize,
    /// How long to wait for the MTU answer before going `Ready` with the
    /// current MTU.
    pub mtu_timeout_ms: u64,
    /// How long to wait for the radio to confirm a requested disconnect
    /// before releasing the link anyway.
    pub disconnect_timeout_ms: u64,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            stop_scan_on_connect: true,
            target_mtu: MAX_MTU,
            list_unnamed_devices: false,
            command_capacity: 32,
            mtu_timeout_ms: 3_000,
            disconnect_timeout_ms: 2_000,
        }
    }
}

impl CentralConfig {
    /// Whether `target_mtu` lies within what ATT allows.
    #[must_use]
    pub fn has_valid_mtu(&self) -> bool {
        (DEFAULT_MTU..=MAX_MTU).contains(&self.target_mtu)
    }

    #[must_use]
    pub fn mtu_timeout(&self) -> Duration {
        Duration::from_millis(self.mtu_timeout_ms)
    }

    #[must_use]
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

/// Scan duty cycle. Passed through to the radio, never interpreted here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    LowPower,
    Balanced,
    #[default]
    LowLatency,
    Opportunistic,
}

/// Parameters of one scan session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub mode: ScanMode,
    /// Only report peripherals advertising one of these services. Empty
    /// means report everything.
    pub service_uuids: Vec<Uuid>,
}
