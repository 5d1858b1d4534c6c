//! # blelink-adapter-btleplug
//!
//! Hardware [`Radio`] backed by [btleplug](https://docs.rs/btleplug).
//!
//! btleplug exposes an `async` request/response API; this adapter turns each
//! request into a spawned task whose outcome is posted on the radio event
//! channel, which is what the central expects.
//!
//! ## Platform gaps
//!
//! - MTU negotiation is not exposed by btleplug. Every request is answered
//!   with *request not supported* and the default MTU, which the central
//!   treats as a non-fatal outcome.
//! - CCCD writes are translated into btleplug `subscribe` / `unsubscribe`
//!   calls, which write the descriptor themselves.
//!
//! ## Dependency rule
//!
//! Depends on `blelink-app` (port traits) and `blelink-domain` only.

mod config;
mod error;
pub mod mapping;

pub use config::BtleplugConfig;
pub use error::BtleplugError;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use btleplug::api::{
    Central as _, CentralEvent, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt as _};
use uuid::Uuid;

use blelink_app::config::ScanConfig;
use blelink_app::ports::{Radio, RadioError, RadioEvent, RadioEventSender};
use blelink_domain::address::DeviceAddress;
use blelink_domain::gatt::{CCCD_UUID, DEFAULT_MTU, DISABLE_NOTIFICATION_VALUE, GattStatus};
use blelink_domain::id::ConnectionId;
use blelink_domain::operation::WriteMode;

const NO_LINK: RadioError = RadioError::Rejected(GattStatus::FAILURE);

struct LinkEntry {
    peripheral: Peripheral,
    connected: bool,
    routed: HashSet<Uuid>,
    forwarder: Option<JoinHandle<()>>,
}

impl LinkEntry {
    fn go_down(&mut self) -> bool {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
        std::mem::replace(&mut self.connected, false)
    }
}

#[derive(Default)]
struct Shared {
    available: bool,
    scanning: bool,
    /// Peripherals seen by the current or a previous scan.
    peripherals: HashMap<DeviceAddress, Peripheral>,
    links: HashMap<ConnectionId, LinkEntry>,
}

/// Radio driving a host Bluetooth adapter.
#[derive(Clone)]
pub struct BtleplugRadio {
    adapter: Adapter,
    config: BtleplugConfig,
    events: RadioEventSender,
    shared: Arc<Mutex<Shared>>,
}

impl BtleplugRadio {
    /// Open the configured host adapter and start watching its events.
    ///
    /// # Errors
    ///
    /// Returns [`BtleplugError`] when the platform manager fails or no
    /// adapter exists at `config.adapter_index`.
    pub async fn open(
        config: BtleplugConfig,
        events: RadioEventSender,
    ) -> Result<Self, BtleplugError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(BtleplugError::NotAvailable {
                index: config.adapter_index,
            })?;

        let central_events = adapter.events().await?;
        tracing::info!(index = config.adapter_index, "BLE adapter opened");

        let radio = Self {
            adapter,
            config,
            events,
            shared: Arc::new(Mutex::new(Shared {
                available: true,
                ..Shared::default()
            })),
        };
        tokio::spawn(radio.clone().watch(central_events));
        Ok(radio)
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Post `event` unless the link was closed in the meantime.
    fn deliver(&self, link: ConnectionId, event: RadioEvent) {
        if !self.shared().links.contains_key(&link) {
            tracing::trace!(%link, "dropping event for closed link");
            return;
        }
        let _ = self.events.send(event);
    }

    fn connected_peripheral(&self, link: ConnectionId) -> Result<Peripheral, RadioError> {
        let shared = self.shared();
        if !shared.available {
            return Err(RadioError::Unavailable);
        }
        shared
            .links
            .get(&link)
            .filter(|entry| entry.connected)
            .map(|entry| entry.peripheral.clone())
            .ok_or(NO_LINK)
    }

    fn characteristic(
        &self,
        link: ConnectionId,
        uuid: Uuid,
    ) -> Result<(Peripheral, Characteristic), RadioError> {
        let peripheral = self.connected_peripheral(link)?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(NO_LINK)?;
        Ok((peripheral, characteristic))
    }

    async fn watch<S>(self, mut stream: S)
    where
        S: Stream<Item = CentralEvent> + Unpin,
    {
        while let Some(event) = stream.next().await {
            match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    self.on_advertisement(&id).await;
                }
                CentralEvent::DeviceDisconnected(id) => self.on_disconnected(&id),
                _ => {}
            }
        }
        tracing::warn!("BLE adapter event stream ended");
        self.on_adapter_lost();
    }

    /// Mark the adapter gone and report every live link as lost, since the
    /// platform will not say anything more about them.
    fn on_adapter_lost(&self) {
        let (was_scanning, lost) = {
            let mut shared = self.shared();
            shared.available = false;
            let was_scanning = std::mem::replace(&mut shared.scanning, false);
            let lost: Vec<ConnectionId> = shared
                .links
                .iter_mut()
                .filter_map(|(link, entry)| entry.go_down().then_some(*link))
                .collect();
            (was_scanning, lost)
        };
        if was_scanning {
            let _ = self.events.send(RadioEvent::ScanFailed {
                status: GattStatus::FAILURE,
            });
        }
        for link in lost {
            tracing::warn!(%link, "link lost with the adapter");
            let _ = self.events.send(RadioEvent::LinkStateChanged {
                link,
                connected: false,
                status: GattStatus::FAILURE,
            });
        }
    }

    async fn on_advertisement(&self, id: &PeripheralId) {
        if !self.shared().scanning {
            return;
        }
        let Ok(peripheral) = self.adapter.peripheral(id).await else {
            return;
        };
        let Ok(Some(props)) = peripheral.properties().await else {
            return;
        };
        let address = mapping::address(props.address);
        tracing::trace!(%address, name = ?props.local_name, rssi = ?props.rssi, "advertisement");
        self.shared().peripherals.insert(address, peripheral);
        let _ = self.events.send(RadioEvent::AdvertisementReceived {
            address,
            name: props.local_name,
            rssi: props.rssi,
        });
    }

    fn on_disconnected(&self, id: &PeripheralId) {
        let lost: Vec<ConnectionId> = self
            .shared()
            .links
            .iter_mut()
            .filter(|(_, entry)| entry.peripheral.id() == *id)
            .filter_map(|(link, entry)| entry.go_down().then_some(*link))
            .collect();
        for link in lost {
            tracing::info!(%link, "peripheral dropped the link");
            let _ = self.events.send(RadioEvent::LinkStateChanged {
                link,
                connected: false,
                status: GattStatus::REMOTE_TERMINATED,
            });
        }
    }

    async fn establish(self, link: ConnectionId, peripheral: Peripheral) {
        let status =
            match tokio::time::timeout(self.config.connect_timeout(), peripheral.connect()).await {
                Ok(Ok(())) => GattStatus::SUCCESS,
                Ok(Err(err)) => {
                    tracing::warn!(%link, error = %err, "connect failed");
                    mapping::status(&err)
                }
                Err(_) => {
                    tracing::warn!(%link, "connect timed out");
                    let _ = peripheral.disconnect().await;
                    GattStatus::LINK_TIMEOUT
                }
            };

        if status.is_success() {
            let forwarder =
                tokio::spawn(self.clone().forward_notifications(link, peripheral.clone()));
            let attached = match self.shared().links.get_mut(&link) {
                Some(entry) => {
                    entry.connected = true;
                    entry.forwarder = Some(forwarder);
                    true
                }
                None => {
                    forwarder.abort();
                    false
                }
            };
            if !attached {
                // Closed while connecting.
                let _ = peripheral.disconnect().await;
                return;
            }
        }

        self.deliver(
            link,
            RadioEvent::LinkStateChanged {
                link,
                connected: status.is_success(),
                status,
            },
        );
    }

    async fn forward_notifications(self, link: ConnectionId, peripheral: Peripheral) {
        let mut stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(%link, error = %err, "notification stream unavailable");
                return;
            }
        };
        while let Some(notification) = stream.next().await {
            let routed = self
                .shared()
                .links
                .get(&link)
                .is_some_and(|entry| entry.routed.contains(&notification.uuid));
            if routed {
                let _ = self.events.send(RadioEvent::CharacteristicChanged {
                    link,
                    characteristic: notification.uuid,
                    value: notification.value,
                });
            }
        }
    }
}

impl Radio for BtleplugRadio {
    fn is_available(&self) -> bool {
        self.shared().available
    }

    fn start_scan(&self, config: &ScanConfig) -> Result<(), RadioError> {
        {
            let mut shared = self.shared();
            if !shared.available {
                return Err(RadioError::Unavailable);
            }
            shared.scanning = true;
        }
        let radio = self.clone();
        let filter = ScanFilter {
            services: config.service_uuids.clone(),
        };
        tokio::spawn(async move {
            if let Err(err) = radio.adapter.start_scan(filter).await {
                tracing::warn!(error = %err, "scan could not be started");
                radio.shared().scanning = false;
                let _ = radio.events.send(RadioEvent::ScanFailed {
                    status: mapping::status(&err),
                });
            }
        });
        Ok(())
    }

    fn stop_scan(&self) {
        self.shared().scanning = false;
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(err) = adapter.stop_scan().await {
                tracing::debug!(error = %err, "stop scan failed");
            }
        });
    }

    fn connect(&self, link: ConnectionId, address: DeviceAddress) -> Result<(), RadioError> {
        let peripheral = {
            let mut shared = self.shared();
            if !shared.available {
                return Err(RadioError::Unavailable);
            }
            let peripheral = shared.peripherals.get(&address).cloned().ok_or(NO_LINK)?;
            shared.links.insert(
                link,
                LinkEntry {
                    peripheral: peripheral.clone(),
                    connected: false,
                    routed: HashSet::new(),
                    forwarder: None,
                },
            );
            peripheral
        };
        tracing::debug!(%link, %address, "connecting");
        tokio::spawn(self.clone().establish(link, peripheral));
        Ok(())
    }

    fn disconnect(&self, link: ConnectionId) {
        let peripheral = {
            let mut shared = self.shared();
            let Some(entry) = shared.links.get_mut(&link) else {
                return;
            };
            if !entry.go_down() {
                return;
            }
            entry.peripheral.clone()
        };
        let radio = self.clone();
        tokio::spawn(async move {
            if let Err(err) = peripheral.disconnect().await {
                tracing::debug!(%link, error = %err, "disconnect request failed");
            }
            radio.deliver(
                link,
                RadioEvent::LinkStateChanged {
                    link,
                    connected: false,
                    status: GattStatus::LOCAL_TERMINATED,
                },
            );
        });
    }

    fn close(&self, link: ConnectionId) {
        let Some(mut entry) = self.shared().links.remove(&link) else {
            return;
        };
        if entry.go_down() {
            tokio::spawn(async move {
                let _ = entry.peripheral.disconnect().await;
            });
        }
    }

    fn discover_services(&self, link: ConnectionId) -> Result<(), RadioError> {
        let peripheral = self.connected_peripheral(link)?;
        let radio = self.clone();
        tokio::spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => RadioEvent::ServicesDiscovered {
                    link,
                    status: GattStatus::SUCCESS,
                    services: mapping::services(&peripheral.services()),
                },
                Err(err) => RadioEvent::ServicesDiscovered {
                    link,
                    status: mapping::status(&err),
                    services: Vec::new(),
                },
            };
            radio.deliver(link, event);
        });
        Ok(())
    }

    fn request_mtu(&self, link: ConnectionId, mtu: u16) -> Result<(), RadioError> {
        self.connected_peripheral(link)?;
        tracing::debug!(%link, mtu, "MTU negotiation not supported by backend");
        self.deliver(
            link,
            RadioEvent::MtuChanged {
                link,
                status: GattStatus::REQUEST_NOT_SUPPORTED,
                mtu: DEFAULT_MTU,
            },
        );
        Ok(())
    }

    fn read_characteristic(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
    ) -> Result<(), RadioError> {
        let (peripheral, target) = self.characteristic(link, characteristic)?;
        let radio = self.clone();
        tokio::spawn(async move {
            let (status, value) = match peripheral.read(&target).await {
                Ok(value) => (GattStatus::SUCCESS, value),
                Err(err) => (mapping::status(&err), Vec::new()),
            };
            radio.deliver(
                link,
                RadioEvent::CharacteristicRead {
                    link,
                    characteristic,
                    status,
                    value,
                },
            );
        });
        Ok(())
    }

    fn write_characteristic(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), RadioError> {
        let (peripheral, target) = self.characteristic(link, characteristic)?;
        let payload = payload.to_vec();
        let radio = self.clone();
        tokio::spawn(async move {
            match mode {
                WriteMode::WithResponse => {
                    let status = match peripheral
                        .write(&target, &payload, WriteType::WithResponse)
                        .await
                    {
                        Ok(()) => GattStatus::SUCCESS,
                        Err(err) => mapping::status(&err),
                    };
                    radio.deliver(
                        link,
                        RadioEvent::CharacteristicWritten {
                            link,
                            characteristic,
                            status,
                        },
                    );
                }
                WriteMode::WithoutResponse => {
                    if let Err(err) = peripheral
                        .write(&target, &payload, WriteType::WithoutResponse)
                        .await
                    {
                        tracing::warn!(%link, %characteristic, error = %err, "unacknowledged write failed");
                    }
                }
            }
        });
        Ok(())
    }

    fn write_descriptor(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        let (peripheral, target) = self.characteristic(link, characteristic)?;
        let other = if descriptor == CCCD_UUID {
            None
        } else {
            Some(
                target
                    .descriptors
                    .iter()
                    .find(|d| d.uuid == descriptor)
                    .cloned()
                    .ok_or(NO_LINK)?,
            )
        };
        let disable = payload == DISABLE_NOTIFICATION_VALUE.as_slice();
        let payload = payload.to_vec();
        let radio = self.clone();
        tokio::spawn(async move {
            let result = match other {
                Some(d) => peripheral.write_descriptor(&d, &payload).await,
                None if disable => peripheral.unsubscribe(&target).await,
                None => peripheral.subscribe(&target).await,
            };
            let status = match result {
                Ok(()) => GattStatus::SUCCESS,
                Err(err) => mapping::status(&err),
            };
            radio.deliver(
                link,
                RadioEvent::DescriptorWritten {
                    link,
                    characteristic,
                    descriptor,
                    status,
                },
            );
        });
        Ok(())
    }

    fn set_notification_routing(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), RadioError> {
        let mut shared = self.shared();
        let entry = shared.links.get_mut(&link).ok_or(NO_LINK)?;
        if enabled {
            entry.routed.insert(characteristic);
        } else {
            entry.routed.remove(&characteristic);
        }
        Ok(())
    }
}
