//! GATT tree snapshot and radio status codes.
//!
//! A successful discovery pass produces a list of [`ServiceDescriptor`]s.
//! They are immutable afterwards: the connection holds them until teardown.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::operation::WriteMode;

/// The Bluetooth SIG base UUID (`0000xxxx-0000-1000-8000-00805F9B34FB`).
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Client Characteristic Configuration Descriptor (`0x2902`).
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_0080_5F9B_34FB);

/// CCCD value enabling notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
/// CCCD value enabling indications.
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];
/// CCCD value disabling both notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// ATT MTU every link starts with before negotiation.
pub const DEFAULT_MTU: u16 = 23;
/// Largest MTU the platforms accept in a negotiation request.
pub const MAX_MTU: u16 = 517;

/// Expand a 16-bit SIG-assigned number into a full UUID.
#[must_use]
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | ((short as u128) << 96))
}

/// Status code reported by the radio for a link or GATT request.
///
/// Codes follow the ATT error space for attribute operations and the HCI
/// disconnect reasons for link events, as Android reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattStatus(pub u16);

impl GattStatus {
    pub const SUCCESS: Self = Self(0x00);
    pub const READ_NOT_PERMITTED: Self = Self(0x02);
    pub const WRITE_NOT_PERMITTED: Self = Self(0x03);
    pub const INSUFFICIENT_AUTHENTICATION: Self = Self(0x05);
    pub const REQUEST_NOT_SUPPORTED: Self = Self(0x06);
    pub const INVALID_OFFSET: Self = Self(0x07);
    pub const INSUFFICIENT_AUTHORIZATION: Self = Self(0x08);
    pub const INVALID_ATTRIBUTE_LENGTH: Self = Self(0x0D);
    pub const INSUFFICIENT_ENCRYPTION: Self = Self(0x0F);
    pub const CONNECTION_CONGESTED: Self = Self(0x8F);
    pub const FAILURE: Self = Self(0x101);

    /// Link supervision timeout (HCI reason, link events only).
    pub const LINK_TIMEOUT: Self = Self(0x08);
    /// Remote user terminated the connection (HCI reason, link events only).
    pub const REMOTE_TERMINATED: Self = Self(0x13);
    /// Connection terminated by the local host (HCI reason, link events only).
    pub const LOCAL_TERMINATED: Self = Self(0x16);
    /// Generic stack error (Android's `GATT_ERROR`, 133).
    pub const GATT_ERROR: Self = Self(0x85);

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Whether an attribute operation failed for lack of access rights.
    #[must_use]
    pub fn is_permission_error(self) -> bool {
        matches!(
            self,
            Self::READ_NOT_PERMITTED
                | Self::WRITE_NOT_PERMITTED
                | Self::INSUFFICIENT_AUTHENTICATION
                | Self::INSUFFICIENT_AUTHORIZATION
                | Self::INSUFFICIENT_ENCRYPTION
        )
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Property flags a characteristic advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct CharacteristicProperties {
    pub readable: bool,
    pub writable: bool,
    pub writable_no_response: bool,
    pub notifiable: bool,
    pub indicatable: bool,
}

/// Capability snapshot of one characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    /// Set when the peripheral exposes a CCCD under this characteristic.
    pub cccd: Option<Uuid>,
}

impl CharacteristicDescriptor {
    /// Pick the write mode for this characteristic.
    ///
    /// Acknowledged writes win when supported; `None` means the
    /// characteristic cannot be written at all.
    #[must_use]
    pub fn write_mode(&self) -> Option<WriteMode> {
        if self.properties.writable {
            Some(WriteMode::WithResponse)
        } else if self.properties.writable_no_response {
            Some(WriteMode::WithoutResponse)
        } else {
            None
        }
    }

    #[must_use]
    pub fn supports_notifications(&self) -> bool {
        self.properties.notifiable || self.properties.indicatable
    }

    /// CCCD value to write when turning value pushes on.
    ///
    /// Indications are preferred when the characteristic supports them.
    #[must_use]
    pub fn enable_value(&self) -> [u8; 2] {
        if self.properties.indicatable {
            ENABLE_INDICATION_VALUE
        } else {
            ENABLE_NOTIFICATION_VALUE
        }
    }
}

/// A primary service and its characteristics, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

/// Find a characteristic by UUID anywhere in a discovered tree.
///
/// When two services expose the same characteristic UUID the first one in
/// discovery order wins.
#[must_use]
pub fn find_characteristic(
    services: &[ServiceDescriptor],
    uuid: Uuid,
) -> Option<&CharacteristicDescriptor> {
    services
        .iter()
        .flat_map(|service| service.characteristics.iter())
        .find(|characteristic| characteristic.uuid == uuid)
}
