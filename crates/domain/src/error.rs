//! Error taxonomy shared across the workspace.
//!
//! Precondition violations (wrong state, missing capability) are returned
//! before any radio call is made. Radio-reported failures reach callers
//! through an operation's completion, converted via
//! [`OperationOutcome::into_result`](crate::operation::OperationOutcome::into_result).

use uuid::Uuid;

use crate::address::DeviceAddress;
use crate::connection::ConnectionState;
use crate::gatt::GattStatus;

#[derive(Debug, thiserror::Error)]
pub enum BleError {
    /// The radio is switched off or absent.
    #[error("bluetooth transport unavailable")]
    TransportUnavailable,

    #[error("a scan session is already active")]
    AlreadyScanning,

    #[error("a connection is already active")]
    AlreadyConnected,

    /// No connection exists to act on.
    #[error("not connected")]
    NotConnected,

    /// A connection exists but has not reached `Ready`.
    #[error("connection is not ready (state: {state})")]
    NotReady { state: ConnectionState },

    /// The characteristic lacks the property the request needs.
    #[error("characteristic {uuid} does not support this operation")]
    Unsupported { uuid: Uuid },

    #[error("characteristic {uuid} has no client configuration descriptor")]
    DescriptorMissing { uuid: Uuid },

    #[error("characteristic {uuid} is not writable")]
    NotWritable { uuid: Uuid },

    #[error("characteristic {uuid} not found on the connected device")]
    CharacteristicNotFound { uuid: Uuid },

    #[error("device {address} has not been seen by the current scan")]
    UnknownDevice { address: DeviceAddress },

    #[error("permission denied by peripheral")]
    PermissionDenied,

    #[error("payload exceeds attribute length or negotiated MTU")]
    LengthExceeded,

    #[error("GATT operation failed with status {0}")]
    OtherFailure(GattStatus),

    #[error("operation cancelled by connection teardown")]
    Cancelled,

    #[error("link failed with status {status}")]
    LinkFailed { status: GattStatus },

    #[error("scan failed with status {status}")]
    ScanFailed { status: GattStatus },

    /// The central event loop has stopped.
    #[error("BLE central has shut down")]
    Shutdown,
}
