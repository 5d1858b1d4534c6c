//! Event: an immutable record of something the central observed.
//!
//! Events feed the external collaborator (a UI, a logger, a test). They
//! are published on a broadcast bus; nothing in the core waits for them.

use uuid::Uuid;

use crate::address::DeviceAddress;
use crate::connection::ConnectionState;
use crate::device::DeviceRecord;
use crate::gatt::GattStatus;
use crate::id::{ConnectionId, EventId, OperationId};
use crate::list_diff::ListEdit;
use crate::operation::{OperationKind, OperationOutcome};
use crate::time::{self, Timestamp};

#[derive(Debug, Clone)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp a payload with a fresh id and the current time.
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: time::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    ScanStarted,
    ScanStopped,
    /// The radio rejected or aborted the scan session.
    ScanFailed {
        status: GattStatus,
    },
    DeviceDiscovered {
        record: DeviceRecord,
    },
    DeviceUpdated {
        record: DeviceRecord,
    },
    /// Edits turning the previously published device list into the current one.
    DeviceListChanged {
        edits: Vec<ListEdit>,
    },
    ConnectionStateChanged {
        connection: ConnectionId,
        address: DeviceAddress,
        from: ConnectionState,
        to: ConnectionState,
    },
    ConnectionFailed {
        connection: ConnectionId,
        address: DeviceAddress,
        status: GattStatus,
    },
    OperationCompleted {
        connection: ConnectionId,
        operation: OperationId,
        kind: OperationKind,
        characteristic: Uuid,
        outcome: OperationOutcome,
    },
    /// Unsolicited value pushed by the peripheral.
    NotificationReceived {
        connection: ConnectionId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_assign_distinct_ids() {
        let a = Event::new(EventPayload::ScanStarted);
        let b = Event::new(EventPayload::ScanStarted);
        assert_ne!(a.id, b.id);
    }
}
