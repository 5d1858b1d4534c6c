//! Scripted peripherals.

use std::collections::HashMap;

use blelink_domain::address::DeviceAddress;
use blelink_domain::gatt::{
    CCCD_UUID, CharacteristicDescriptor, CharacteristicProperties, GattStatus, ServiceDescriptor,
    uuid_from_u16,
};
use uuid::Uuid;

pub const HEART_RATE_SERVICE: Uuid = uuid_from_u16(0x180D);
pub const HEART_RATE_MEASUREMENT: Uuid = uuid_from_u16(0x2A37);
pub const HEART_RATE_CONTROL_POINT: Uuid = uuid_from_u16(0x2A39);
pub const BATTERY_SERVICE: Uuid = uuid_from_u16(0x180F);
pub const BATTERY_LEVEL: Uuid = uuid_from_u16(0x2A19);
pub const ENVIRONMENTAL_SENSING_SERVICE: Uuid = uuid_from_u16(0x181A);
pub const TEMPERATURE: Uuid = uuid_from_u16(0x2A6E);

pub const DEMO_HEART_RATE_MONITOR: DeviceAddress =
    DeviceAddress::new([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01]);
pub const DEMO_THERMOMETER: DeviceAddress = DeviceAddress::new([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x02]);

/// A peripheral the simulated radio can advertise and connect to.
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub rssi: i16,
    pub services: Vec<ServiceDescriptor>,
    /// MTU the peripheral agrees to; `None` refuses negotiation.
    pub mtu: Option<u16>,
    /// Status reported instead of establishing the link.
    pub fail_connect: Option<GattStatus>,
    pub(crate) values: HashMap<Uuid, Vec<u8>>,
    pub(crate) status_overrides: HashMap<Uuid, GattStatus>,
}

impl SimulatedPeripheral {
    #[must_use]
    pub fn new(address: DeviceAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: Some(name.into()),
            rssi: -60,
            services: Vec::new(),
            mtu: Some(247),
            fail_connect: None,
            values: HashMap::new(),
            status_overrides: HashMap::new(),
        }
    }

    /// A peripheral advertising without a local name.
    #[must_use]
    pub fn unnamed(address: DeviceAddress) -> Self {
        Self {
            name: None,
            ..Self::new(address, String::new())
        }
    }

    #[must_use]
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    #[must_use]
    pub fn with_service(mut self, service: ServiceDescriptor) -> Self {
        self.services.push(service);
        self
    }

    /// Initial value returned by reads of `characteristic`.
    #[must_use]
    pub fn with_value(mut self, characteristic: Uuid, value: impl Into<Vec<u8>>) -> Self {
        self.values.insert(characteristic, value.into());
        self
    }

    /// Answer every read or write of `characteristic` with `status`.
    #[must_use]
    pub fn with_status(mut self, characteristic: Uuid, status: GattStatus) -> Self {
        self.status_overrides.insert(characteristic, status);
        self
    }

    #[must_use]
    pub fn with_mtu(mut self, mtu: Option<u16>) -> Self {
        self.mtu = mtu;
        self
    }

    #[must_use]
    pub fn failing_connect(mut self, status: GattStatus) -> Self {
        self.fail_connect = Some(status);
        self
    }

    /// Whether the peripheral advertises at least one of `filter`. An empty
    /// filter matches everything.
    #[must_use]
    pub fn advertises_any(&self, filter: &[Uuid]) -> bool {
        filter.is_empty()
            || self
                .services
                .iter()
                .any(|service| filter.contains(&service.uuid))
    }

    /// Heart rate monitor: notifiable measurement, writable control point
    /// and a readable battery level.
    #[must_use]
    pub fn heart_rate_monitor(address: DeviceAddress) -> Self {
        Self::new(address, "HRM-Sim")
            .with_service(ServiceDescriptor {
                uuid: HEART_RATE_SERVICE,
                characteristics: vec![
                    characteristic(
                        HEART_RATE_MEASUREMENT,
                        CharacteristicProperties {
                            notifiable: true,
                            ..Default::default()
                        },
                        true,
                    ),
                    characteristic(
                        HEART_RATE_CONTROL_POINT,
                        CharacteristicProperties {
                            writable: true,
                            ..Default::default()
                        },
                        false,
                    ),
                ],
            })
            .with_service(battery_service())
            .with_value(BATTERY_LEVEL, [87])
    }

    /// Thermometer: readable and indicatable temperature, battery level.
    #[must_use]
    pub fn thermometer(address: DeviceAddress) -> Self {
        Self::new(address, "Thermo-Sim")
            .with_rssi(-72)
            .with_service(ServiceDescriptor {
                uuid: ENVIRONMENTAL_SENSING_SERVICE,
                characteristics: vec![characteristic(
                    TEMPERATURE,
                    CharacteristicProperties {
                        readable: true,
                        indicatable: true,
                        ..Default::default()
                    },
                    true,
                )],
            })
            .with_service(battery_service())
            // 21.50 °C, little-endian hundredths.
            .with_value(TEMPERATURE, 2150_i16.to_le_bytes())
            .with_value(BATTERY_LEVEL, [64])
    }
}

/// The peripherals the demo binary advertises.
#[must_use]
pub fn demo_peripherals() -> Vec<SimulatedPeripheral> {
    vec![
        SimulatedPeripheral::heart_rate_monitor(DEMO_HEART_RATE_MONITOR),
        SimulatedPeripheral::thermometer(DEMO_THERMOMETER),
        SimulatedPeripheral::unnamed(DeviceAddress::new([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x03]))
            .with_rssi(-90),
    ]
}

fn battery_service() -> ServiceDescriptor {
    ServiceDescriptor {
        uuid: BATTERY_SERVICE,
        characteristics: vec![characteristic(
            BATTERY_LEVEL,
            CharacteristicProperties {
                readable: true,
                ..Default::default()
            },
            false,
        )],
    }
}

fn characteristic(
    uuid: Uuid,
    properties: CharacteristicProperties,
    cccd: bool,
) -> CharacteristicDescriptor {
    CharacteristicDescriptor {
        uuid,
        properties,
        cccd: cccd.then_some(CCCD_UUID),
    }
}
