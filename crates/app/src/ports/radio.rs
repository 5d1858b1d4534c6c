//! Radio port: the transport the central drives.
//!
//! Every request is fire-and-forget: the method only says whether the
//! platform *accepted* the request. The result arrives later as a
//! [`RadioEvent`] on the channel the adapter was built with, from whatever
//! thread or task the platform calls back on. The central actor is the only
//! consumer of that channel, so all state changes happen on its task.
//!
//! Adapters must never call back into the core from inside a request
//! method; they post an event instead.

use blelink_domain::address::DeviceAddress;
use blelink_domain::gatt::{GattStatus, ServiceDescriptor};
use blelink_domain::id::ConnectionId;
use blelink_domain::operation::{OperationOutcome, WriteMode};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::ScanConfig;

/// Sending half handed to radio adapters. Unbounded so that platform
/// callbacks never block.
pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;

/// Receiving half consumed by the central actor.
pub type RadioEventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

/// Create the channel linking a radio adapter to the central.
#[must_use]
pub fn radio_event_channel() -> (RadioEventSender, RadioEventReceiver) {
    mpsc::unbounded_channel()
}

/// Why the platform refused to start a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    /// The adapter is off or missing.
    #[error("radio unavailable")]
    Unavailable,

    /// The platform refused the request outright.
    #[error("request rejected with status {0}")]
    Rejected(GattStatus),
}

impl RadioError {
    /// Status to report when a rejected request is resolved as a failure.
    #[must_use]
    pub fn status(self) -> GattStatus {
        match self {
            Self::Unavailable => GattStatus::FAILURE,
            Self::Rejected(status) => status,
        }
    }

    /// Outcome of an operation the radio refused to start.
    #[must_use]
    pub fn outcome(self) -> OperationOutcome {
        match self {
            Self::Unavailable => OperationOutcome::TransportUnavailable,
            Self::Rejected(status) => OperationOutcome::OtherFailure(status),
        }
    }
}

/// Completions and unsolicited events reported by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    AdvertisementReceived {
        address: DeviceAddress,
        name: Option<String>,
        rssi: Option<i16>,
    },
    /// The scan session could not be started or was aborted.
    ScanFailed {
        status: GattStatus,
    },
    LinkStateChanged {
        link: ConnectionId,
        connected: bool,
        status: GattStatus,
    },
    ServicesDiscovered {
        link: ConnectionId,
        status: GattStatus,
        services: Vec<ServiceDescriptor>,
    },
    MtuChanged {
        link: ConnectionId,
        status: GattStatus,
        mtu: u16,
    },
    CharacteristicRead {
        link: ConnectionId,
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    },
    CharacteristicWritten {
        link: ConnectionId,
        characteristic: Uuid,
        status: GattStatus,
    },
    DescriptorWritten {
        link: ConnectionId,
        characteristic: Uuid,
        descriptor: Uuid,
        status: GattStatus,
    },
    /// Unsolicited notification or indication value.
    CharacteristicChanged {
        link: ConnectionId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

impl RadioEvent {
    /// The link the event belongs to, if any.
    #[must_use]
    pub fn link(&self) -> Option<ConnectionId> {
        match self {
            Self::AdvertisementReceived { .. } | Self::ScanFailed { .. } => None,
            Self::LinkStateChanged { link, .. }
            | Self::ServicesDiscovered { link, .. }
            | Self::MtuChanged { link, .. }
            | Self::CharacteristicRead { link, .. }
            | Self::CharacteristicWritten { link, .. }
            | Self::DescriptorWritten { link, .. }
            | Self::CharacteristicChanged { link, .. } => Some(*link),
        }
    }
}

/// A BLE central radio.
///
/// Methods return immediately. `Ok(())` means "accepted, a completion event
/// will follow"; the exceptions are [`stop_scan`](Self::stop_scan),
/// [`close`](Self::close) and
/// [`set_notification_routing`](Self::set_notification_routing), which are
/// local and complete synchronously.
pub trait Radio: Send + Sync {
    /// Whether the adapter is present and powered.
    fn is_available(&self) -> bool;

    /// Start delivering `AdvertisementReceived` events.
    ///
    /// # Errors
    ///
    /// Returns [`RadioError`] when the platform refuses the scan.
    fn start_scan(&self, config: &ScanConfig) -> Result<(), RadioError>;

    fn stop_scan(&self);

    /// Open a link to `address`, tagged `link`; completes with
    /// `LinkStateChanged`.
    ///
    /// # Errors
    ///
    /// Returns [`RadioError`] when the request cannot be started.
    fn connect(&self, link: ConnectionId, address: DeviceAddress) -> Result<(), RadioError>;

    /// Ask the peripheral to drop the link; completes with
    /// `LinkStateChanged { connected: false, .. }`.
    fn disconnect(&self, link: ConnectionId);

    /// Release every platform resource held for `link`. Called exactly once
    /// per link, after which no event for it may be delivered.
    fn close(&self, link: ConnectionId);

    /// # Errors
    ///
    /// Returns [`RadioError`] when the request cannot be started.
    fn discover_services(&self, link: ConnectionId) -> Result<(), RadioError>;

    /// # Errors
    ///
    /// Returns [`RadioError`] when the request cannot be started.
    fn request_mtu(&self, link: ConnectionId, mtu: u16) -> Result<(), RadioError>;

    /// # Errors
    ///
    /// Returns [`RadioError`] when the request cannot be started.
    fn read_characteristic(&self, link: ConnectionId, characteristic: Uuid)
    -> Result<(), RadioError>;

    /// # Errors
    ///
    /// Returns [`RadioError`] when the request cannot be started.
    fn write_characteristic(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), RadioError>;

    /// # Errors
    ///
    /// Returns [`RadioError`] when the request cannot be started.
    fn write_descriptor(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError>;

    /// Register or drop local routing of value pushes for `characteristic`.
    ///
    /// # Errors
    ///
    /// Returns [`RadioError`] when the platform rejects the registration.
    fn set_notification_routing(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), RadioError>;
}

impl<T: Radio> Radio for std::sync::Arc<T> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn start_scan(&self, config: &ScanConfig) -> Result<(), RadioError> {
        (**self).start_scan(config)
    }

    fn stop_scan(&self) {
        (**self).stop_scan();
    }

    fn connect(&self, link: ConnectionId, address: DeviceAddress) -> Result<(), RadioError> {
        (**self).connect(link, address)
    }

    fn disconnect(&self, link: ConnectionId) {
        (**self).disconnect(link);
    }

    fn close(&self, link: ConnectionId) {
        (**self).close(link);
    }

    fn discover_services(&self, link: ConnectionId) -> Result<(), RadioError> {
        (**self).discover_services(link)
    }

    fn request_mtu(&self, link: ConnectionId, mtu: u16) -> Result<(), RadioError> {
        (**self).request_mtu(link, mtu)
    }

    fn read_characteristic(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
    ) -> Result<(), RadioError> {
        (**self).read_characteristic(link, characteristic)
    }

    fn write_characteristic(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), RadioError> {
        (**self).write_characteristic(link, characteristic, payload, mode)
    }

    fn write_descriptor(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        (**self).write_descriptor(link, characteristic, descriptor, payload)
    }

    fn set_notification_routing(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), RadioError> {
        (**self).set_notification_routing(link, characteristic, enabled)
    }
}
