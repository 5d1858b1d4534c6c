//! GATT operations and the classification of their outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BleError;
use crate::gatt::GattStatus;

/// How a characteristic write is carried over the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    /// Write request, acknowledged by the peripheral.
    WithResponse,
    /// Write command, no acknowledgement from the peripheral.
    WithoutResponse,
}

/// Discriminant of an [`Operation`], used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Read,
    Write,
    WriteDescriptor,
    EnableNotification,
    DisableNotification,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::WriteDescriptor => "write_descriptor",
            Self::EnableNotification => "enable_notification",
            Self::DisableNotification => "disable_notification",
        };
        f.write_str(name)
    }
}

/// One GATT command waiting for, or holding, the connection's single
/// in-flight slot.
///
/// The notification variants are the *local* routing registration step;
/// the CCCD write that follows it is a separate `WriteDescriptor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read {
        characteristic: Uuid,
    },
    Write {
        characteristic: Uuid,
        payload: Vec<u8>,
        mode: WriteMode,
    },
    WriteDescriptor {
        characteristic: Uuid,
        descriptor: Uuid,
        payload: Vec<u8>,
    },
    EnableNotification {
        characteristic: Uuid,
    },
    DisableNotification {
        characteristic: Uuid,
    },
}

impl Operation {
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Read { .. } => OperationKind::Read,
            Self::Write { .. } => OperationKind::Write,
            Self::WriteDescriptor { .. } => OperationKind::WriteDescriptor,
            Self::EnableNotification { .. } => OperationKind::EnableNotification,
            Self::DisableNotification { .. } => OperationKind::DisableNotification,
        }
    }

    /// The characteristic this operation targets (the owner of the
    /// descriptor for descriptor writes).
    #[must_use]
    pub fn characteristic(&self) -> Uuid {
        match self {
            Self::Read { characteristic }
            | Self::Write { characteristic, .. }
            | Self::WriteDescriptor { characteristic, .. }
            | Self::EnableNotification { characteristic }
            | Self::DisableNotification { characteristic } => *characteristic,
        }
    }

    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Write { payload, .. } | Self::WriteDescriptor { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

/// Final result delivered through an operation's completion contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Completed; reads carry the value read.
    Success(Option<Vec<u8>>),
    PermissionDenied,
    /// The payload did not fit the attribute or the negotiated MTU.
    LengthExceeded,
    OtherFailure(GattStatus),
    /// The radio went away before the operation could run.
    TransportUnavailable,
    /// Discarded because the connection was torn down.
    Cancelled,
}

impl OperationOutcome {
    /// Classify a radio completion from its status code.
    ///
    /// The payload is only kept on success.
    #[must_use]
    pub fn from_status(status: GattStatus, payload: Option<Vec<u8>>) -> Self {
        if status.is_success() {
            Self::Success(payload)
        } else if status.is_permission_error() {
            Self::PermissionDenied
        } else if status == GattStatus::INVALID_ATTRIBUTE_LENGTH {
            Self::LengthExceeded
        } else {
            Self::OtherFailure(status)
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Turn the outcome into a `Result` for callers using `?`.
    ///
    /// # Errors
    ///
    /// Returns the [`BleError`] variant matching a failed outcome.
    pub fn into_result(self) -> Result<Option<Vec<u8>>, BleError> {
        match self {
            Self::Success(payload) => Ok(payload),
            Self::PermissionDenied => Err(BleError::PermissionDenied),
            Self::LengthExceeded => Err(BleError::LengthExceeded),
            Self::OtherFailure(status) => Err(BleError::OtherFailure(status)),
            Self::TransportUnavailable => Err(BleError::TransportUnavailable),
            Self::Cancelled => Err(BleError::Cancelled),
        }
    }
}
