//! Device record: what a scan session has seen of one peripheral.

use crate::address::DeviceAddress;
use crate::time::{self, Monotonic};

/// A peripheral seen during the current scan session.
///
/// Records are unique by [`address`](Self::address). They are created or
/// refreshed on every advertisement and only discarded when a new scan
/// session starts.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub address: DeviceAddress,
    pub display_name: Option<String>,
    pub rssi: Option<i16>,
    pub last_seen: Monotonic,
}

impl DeviceRecord {
    /// Build a record stamped with the current monotonic time.
    #[must_use]
    pub fn new(address: DeviceAddress, display_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            address,
            display_name: display_name.filter(|name| !name.trim().is_empty()),
            rssi,
            last_seen: time::monotonic_now(),
        }
    }

    /// Whether the peripheral advertised a non-empty name.
    #[must_use]
    pub fn has_display_name(&self) -> bool {
        self.display_name.is_some()
    }

    /// Compare the parts of a record a list view renders.
    ///
    /// `last_seen` is bookkeeping and excluded: a repeated
    /// identical advertisement does not count as a change.
    #[must_use]
    pub fn same_contents(&self, other: &Self) -> bool {
        self.address == other.address
            && self.display_name == other.display_name
            && self.rssi == other.rssi
    }
}
