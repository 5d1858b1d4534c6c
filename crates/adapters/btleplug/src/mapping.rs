//! Conversions between btleplug types and the domain model.

use btleplug::api::{BDAddr, CharPropFlags, Characteristic, Service};
use blelink_domain::address::DeviceAddress;
use blelink_domain::gatt::{
    CCCD_UUID, CharacteristicDescriptor, CharacteristicProperties, GattStatus, ServiceDescriptor,
};

#[must_use]
pub fn address(addr: BDAddr) -> DeviceAddress {
    DeviceAddress::new(addr.into_inner())
}

#[must_use]
pub fn properties(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        readable: flags.contains(CharPropFlags::READ),
        writable: flags.contains(CharPropFlags::WRITE),
        writable_no_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notifiable: flags.contains(CharPropFlags::NOTIFY),
        indicatable: flags.contains(CharPropFlags::INDICATE),
    }
}

/// Some host stacks keep the CCCD to themselves and never list it, so a
/// notifiable or indicatable characteristic is assumed to carry one.
#[must_use]
pub fn characteristic(characteristic: &Characteristic) -> CharacteristicDescriptor {
    let properties = properties(characteristic.properties);
    let listed = characteristic
        .descriptors
        .iter()
        .any(|descriptor| descriptor.uuid == CCCD_UUID);
    let implied = properties.notifiable || properties.indicatable;
    CharacteristicDescriptor {
        uuid: characteristic.uuid,
        properties,
        cccd: (listed || implied).then_some(CCCD_UUID),
    }
}

/// Services in platform order, characteristics in the order the platform
/// set yields them.
#[must_use]
pub fn services<'a>(services: impl IntoIterator<Item = &'a Service>) -> Vec<ServiceDescriptor> {
    services
        .into_iter()
        .map(|service| ServiceDescriptor {
            uuid: service.uuid,
            characteristics: service.characteristics.iter().map(characteristic).collect(),
        })
        .collect()
}

/// Best-effort status for a failed backend call. btleplug hides the ATT
/// error code, so only the failure class survives.
#[must_use]
pub fn status(err: &btleplug::Error) -> GattStatus {
    match err {
        btleplug::Error::PermissionDenied => GattStatus::INSUFFICIENT_AUTHORIZATION,
        btleplug::Error::NotSupported(_) => GattStatus::REQUEST_NOT_SUPPORTED,
        btleplug::Error::TimedOut(_) => GattStatus::LINK_TIMEOUT,
        btleplug::Error::NotConnected => GattStatus::FAILURE,
        _ => GattStatus::GATT_ERROR,
    }
}
