//! In-memory fakes for the ports, shared by the unit tests of this crate.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use blelink_domain::address::DeviceAddress;
use blelink_domain::event::{Event, EventPayload};
use blelink_domain::gatt::{
    CCCD_UUID, CharacteristicDescriptor, CharacteristicProperties, ServiceDescriptor,
    uuid_from_u16,
};
use blelink_domain::id::ConnectionId;
use blelink_domain::operation::WriteMode;
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::ports::{EventPublisher, Radio, RadioError};

pub const HEART_RATE_SERVICE: Uuid = uuid_from_u16(0x180D);
pub const BATTERY_SERVICE: Uuid = uuid_from_u16(0x180F);
/// Notifiable only.
pub const HEART_RATE_MEASUREMENT: Uuid = uuid_from_u16(0x2A37);
/// Readable only.
pub const BATTERY_LEVEL: Uuid = uuid_from_u16(0x2A19);
/// Writable (acknowledged and unacknowledged).
pub const CONTROL_POINT: Uuid = uuid_from_u16(0x2A39);
/// Unacknowledged write only.
pub const COMMAND: Uuid = uuid_from_u16(0xFFF1);
/// Indicatable only.
pub const INDICATE_ONLY: Uuid = uuid_from_u16(0xFFF2);
/// Notifiable but without a CCCD.
pub const NO_CCCD: Uuid = uuid_from_u16(0xFFF3);

pub fn address() -> DeviceAddress {
    DeviceAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
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

/// Two services covering every property combination the tests need.
pub fn sample_services() -> Vec<ServiceDescriptor> {
    vec![
        ServiceDescriptor {
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
                    CONTROL_POINT,
                    CharacteristicProperties {
                        writable: true,
                        writable_no_response: true,
                        ..Default::default()
                    },
                    false,
                ),
                characteristic(
                    COMMAND,
                    CharacteristicProperties {
                        writable_no_response: true,
                        ..Default::default()
                    },
                    false,
                ),
                characteristic(
                    INDICATE_ONLY,
                    CharacteristicProperties {
                        indicatable: true,
                        ..Default::default()
                    },
                    true,
                ),
                characteristic(
                    NO_CCCD,
                    CharacteristicProperties {
                        notifiable: true,
                        ..Default::default()
                    },
                    false,
                ),
            ],
        },
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
        },
    ]
}

/// Every request a [`FakeRadio`] received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    StartScan,
    StopScan,
    Connect {
        link: ConnectionId,
        address: DeviceAddress,
    },
    Disconnect {
        link: ConnectionId,
    },
    Close {
        link: ConnectionId,
    },
    DiscoverServices {
        link: ConnectionId,
    },
    RequestMtu {
        link: ConnectionId,
        mtu: u16,
    },
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
    SetNotificationRouting {
        characteristic: Uuid,
        enabled: bool,
    },
}

/// Radio that records requests and never answers on its own; tests inject
/// completions by hand.
pub struct FakeRadio {
    calls: Mutex<Vec<RadioCall>>,
    available: AtomicBool,
    reject_scan: AtomicBool,
    reject_reads: AtomicBool,
    rejected_routing: Mutex<HashSet<Uuid>>,
}

impl Default for FakeRadio {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            reject_scan: AtomicBool::new(false),
            reject_reads: AtomicBool::new(false),
            rejected_routing: Mutex::new(HashSet::new()),
        }
    }
}

impl FakeRadio {
    pub fn calls(&self) -> Vec<RadioCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, predicate: impl Fn(&RadioCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn reject_scan(&self) {
        self.reject_scan.store(true, Ordering::SeqCst);
    }

    pub fn reject_reads(&self) {
        self.reject_reads.store(true, Ordering::SeqCst);
    }

    /// Refuse routing registration and removal for `characteristic`.
    pub fn reject_routing_for(&self, characteristic: Uuid) {
        self.rejected_routing.lock().unwrap().insert(characteristic);
    }

    fn record(&self, call: RadioCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Record a GATT request, refused while the radio is off.
    fn request(&self, call: RadioCall) -> Result<(), RadioError> {
        self.record(call);
        if self.is_available() {
            Ok(())
        } else {
            Err(RadioError::Unavailable)
        }
    }
}

impl Radio for FakeRadio {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn start_scan(&self, _config: &ScanConfig) -> Result<(), RadioError> {
        self.record(RadioCall::StartScan);
        if self.reject_scan.load(Ordering::SeqCst) {
            return Err(RadioError::Rejected(blelink_domain::gatt::GattStatus(2)));
        }
        Ok(())
    }

    fn stop_scan(&self) {
        self.record(RadioCall::StopScan);
    }

    fn connect(&self, link: ConnectionId, address: DeviceAddress) -> Result<(), RadioError> {
        self.record(RadioCall::Connect { link, address });
        Ok(())
    }

    fn disconnect(&self, link: ConnectionId) {
        self.record(RadioCall::Disconnect { link });
    }

    fn close(&self, link: ConnectionId) {
        self.record(RadioCall::Close { link });
    }

    fn discover_services(&self, link: ConnectionId) -> Result<(), RadioError> {
        self.request(RadioCall::DiscoverServices { link })
    }

    fn request_mtu(&self, link: ConnectionId, mtu: u16) -> Result<(), RadioError> {
        self.request(RadioCall::RequestMtu { link, mtu })
    }

    fn read_characteristic(
        &self,
        _link: ConnectionId,
        characteristic: Uuid,
    ) -> Result<(), RadioError> {
        self.request(RadioCall::Read { characteristic })?;
        if self.reject_reads.load(Ordering::SeqCst) {
            return Err(RadioError::Rejected(
                blelink_domain::gatt::GattStatus::CONNECTION_CONGESTED,
            ));
        }
        Ok(())
    }

    fn write_characteristic(
        &self,
        _link: ConnectionId,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), RadioError> {
        self.request(RadioCall::Write {
            characteristic,
            payload: payload.to_vec(),
            mode,
        })
    }

    fn write_descriptor(
        &self,
        _link: ConnectionId,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        self.request(RadioCall::WriteDescriptor {
            characteristic,
            descriptor,
            payload: payload.to_vec(),
        })
    }

    fn set_notification_routing(
        &self,
        _link: ConnectionId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), RadioError> {
        self.request(RadioCall::SetNotificationRouting {
            characteristic,
            enabled,
        })?;
        if self.rejected_routing.lock().unwrap().contains(&characteristic) {
            return Err(RadioError::Rejected(blelink_domain::gatt::GattStatus::FAILURE));
        }
        Ok(())
    }
}

/// Publisher keeping every event for later assertions.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
}

impl RecordingPublisher {
    pub fn payloads(&self) -> Vec<EventPayload> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
