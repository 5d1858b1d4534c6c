//! # blelink-adapter-simulated
//!
//! A [`Radio`] backed by scripted peripherals instead of hardware.
//!
//! ## Behaviour
//!
//! | Request | Answer |
//! |---------|--------|
//! | `start_scan` | Advertises every matching peripheral each `advertising_interval_ms` |
//! | `connect` | Link up, or down with the peripheral's scripted failure status |
//! | `discover_services` | The peripheral's GATT tree |
//! | `request_mtu` | `min(requested, peripheral)`, or *request not supported* |
//! | `read_characteristic` | The stored value, or the scripted status |
//! | `write_characteristic` | Stores the value; acknowledged writes only get a completion |
//! | `write_descriptor` | Tracks CCCD subscriptions |
//!
//! Completions are delivered in request order, each `latency_ms` after the
//! previous one. Value pushes are injected with
//! [`SimulatedRadio::push_notification`] and link losses with
//! [`SimulatedRadio::drop_link`].
//!
//! ## Dependency rule
//!
//! Depends on `blelink-app` (port traits) and `blelink-domain` only.

mod config;
mod peripheral;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use blelink_app::config::ScanConfig;
use blelink_app::ports::{Radio, RadioError, RadioEvent, RadioEventSender};
use blelink_domain::address::DeviceAddress;
use blelink_domain::gatt::{
    CCCD_UUID, DEFAULT_MTU, DISABLE_NOTIFICATION_VALUE, GattStatus, find_characteristic,
};
use blelink_domain::id::ConnectionId;
use blelink_domain::operation::WriteMode;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use config::SimulatedConfig;
pub use peripheral::{
    BATTERY_LEVEL, BATTERY_SERVICE, DEMO_HEART_RATE_MONITOR, DEMO_THERMOMETER,
    ENVIRONMENTAL_SENSING_SERVICE, HEART_RATE_CONTROL_POINT, HEART_RATE_MEASUREMENT,
    HEART_RATE_SERVICE, SimulatedPeripheral, TEMPERATURE, demo_peripherals,
};

/// Largest attribute value a peripheral accepts.
const MAX_ATTRIBUTE_LEN: usize = 512;

/// How many released links [`SimulatedRadio::closed_links`] remembers.
const CLOSED_HISTORY: usize = 64;

struct Link {
    address: DeviceAddress,
    connected: bool,
    subscribed: HashSet<Uuid>,
}

struct State {
    available: bool,
    scanning: bool,
    scan_generation: u64,
    peripherals: Vec<SimulatedPeripheral>,
    links: HashMap<ConnectionId, Link>,
    /// Most recently released links, oldest first. Inspection only.
    closed: VecDeque<ConnectionId>,
}

impl State {
    fn peripheral(&self, address: DeviceAddress) -> Option<&SimulatedPeripheral> {
        self.peripherals.iter().find(|p| p.address == address)
    }

    fn peripheral_mut(&mut self, address: DeviceAddress) -> Option<&mut SimulatedPeripheral> {
        self.peripherals.iter_mut().find(|p| p.address == address)
    }

    /// Peripheral behind a connected link.
    fn connected(&self, link: ConnectionId) -> Result<&SimulatedPeripheral, RadioError> {
        if !self.available {
            return Err(RadioError::Unavailable);
        }
        self.links
            .get(&link)
            .filter(|l| l.connected)
            .and_then(|l| self.peripheral(l.address))
            .ok_or(RadioError::Rejected(GattStatus::FAILURE))
    }

    fn connected_address(&self, link: ConnectionId) -> Result<DeviceAddress, RadioError> {
        self.connected(link).map(|p| p.address)
    }

    fn link_for(&mut self, address: DeviceAddress) -> Option<(ConnectionId, &mut Link)> {
        self.links
            .iter_mut()
            .find(|(_, l)| l.connected && l.address == address)
            .map(|(id, l)| (*id, l))
    }
}

/// Radio simulating a set of peripherals.
///
/// Must be created from within a tokio runtime: completions are delivered
/// by a background task.
#[derive(Clone)]
pub struct SimulatedRadio {
    config: SimulatedConfig,
    events: RadioEventSender,
    delayed: mpsc::UnboundedSender<RadioEvent>,
    state: Arc<Mutex<State>>,
}

impl SimulatedRadio {
    #[must_use]
    pub fn new(
        peripherals: Vec<SimulatedPeripheral>,
        config: SimulatedConfig,
        events: RadioEventSender,
    ) -> Self {
        let (delayed, mut pending) = mpsc::unbounded_channel::<RadioEvent>();
        let latency = config.latency();
        let sink = events.clone();
        tokio::spawn(async move {
            while let Some(event) = pending.recv().await {
                tokio::time::sleep(latency).await;
                if sink.send(event).is_err() {
                    break;
                }
            }
        });

        Self {
            config,
            events,
            delayed,
            state: Arc::new(Mutex::new(State {
                available: true,
                scanning: false,
                scan_generation: 0,
                peripherals,
                links: HashMap::new(),
                closed: VecDeque::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post(&self, event: RadioEvent) {
        if self.delayed.send(event).is_err() {
            tracing::debug!("simulated radio delivery task stopped");
        }
    }

    /// Power the simulated adapter on or off.
    ///
    /// Powering off ends the scan and drops every connected link with a
    /// failure status, the way a host stack reports a lost adapter.
    pub fn set_available(&self, available: bool) {
        let lost: Vec<ConnectionId> = {
            let mut state = self.state();
            state.available = available;
            if available {
                return;
            }
            state.scanning = false;
            state
                .links
                .iter_mut()
                .filter_map(|(id, link)| {
                    link.subscribed.clear();
                    std::mem::replace(&mut link.connected, false).then_some(*id)
                })
                .collect()
        };
        for link in lost {
            tracing::debug!(%link, "simulated radio powered off, link lost");
            self.post(RadioEvent::LinkStateChanged {
                link,
                connected: false,
                status: GattStatus::FAILURE,
            });
        }
    }

    /// Add a peripheral after construction; it is advertised from the next
    /// scan round.
    pub fn add_peripheral(&self, peripheral: SimulatedPeripheral) {
        self.state().peripherals.push(peripheral);
    }

    /// Push a value for `characteristic` of `address`, as if the peripheral
    /// notified it. Returns `false` when no connected link has subscribed
    /// through the CCCD.
    pub fn push_notification(
        &self,
        address: DeviceAddress,
        characteristic: Uuid,
        value: impl Into<Vec<u8>>,
    ) -> bool {
        let link = {
            let mut state = self.state();
            match state.link_for(address) {
                Some((id, link)) if link.subscribed.contains(&characteristic) => id,
                _ => return false,
            }
        };
        self.post(RadioEvent::CharacteristicChanged {
            link,
            characteristic,
            value: value.into(),
        });
        true
    }

    /// Drop the link to `address` from the peripheral side. Returns `false`
    /// when nothing was connected.
    pub fn drop_link(&self, address: DeviceAddress, status: GattStatus) -> bool {
        let link = {
            let mut state = self.state();
            let Some((id, link)) = state.link_for(address) else {
                return false;
            };
            link.connected = false;
            link.subscribed.clear();
            id
        };
        tracing::debug!(%address, status = %status, "simulated link lost");
        self.post(RadioEvent::LinkStateChanged {
            link,
            connected: false,
            status,
        });
        true
    }

    /// Current stored value of a characteristic, including written ones.
    #[must_use]
    pub fn value(&self, address: DeviceAddress, characteristic: Uuid) -> Option<Vec<u8>> {
        self.state()
            .peripheral(address)
            .and_then(|p| p.values.get(&characteristic).cloned())
    }

    /// The last links released through [`Radio::close`], in order.
    #[must_use]
    pub fn closed_links(&self) -> Vec<ConnectionId> {
        self.state().closed.iter().copied().collect()
    }

    /// Whether a scan session is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    fn spawn_advertiser(&self, generation: u64, filter: Vec<Uuid>) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let interval = self.config.advertising_interval();
        let jitter = self.config.rssi_jitter;

        tokio::spawn(async move {
            let mut round: u64 = 0;
            loop {
                let adverts: Vec<RadioEvent> = {
                    let state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    if !state.scanning || state.scan_generation != generation {
                        break;
                    }
                    let drift = if round % 2 == 1 { jitter } else { 0 };
                    state
                        .peripherals
                        .iter()
                        .filter(|p| p.advertises_any(&filter))
                        .map(|p| RadioEvent::AdvertisementReceived {
                            address: p.address,
                            name: p.name.clone(),
                            rssi: Some(p.rssi.saturating_add(drift)),
                        })
                        .collect()
                };
                for advert in adverts {
                    if events.send(advert).is_err() {
                        return;
                    }
                }
                round += 1;
                tokio::time::sleep(interval).await;
            }
            tracing::debug!(generation, "simulated scan ended");
        });
    }
}

impl Radio for SimulatedRadio {
    fn is_available(&self) -> bool {
        self.state().available
    }

    fn start_scan(&self, config: &ScanConfig) -> Result<(), RadioError> {
        let generation = {
            let mut state = self.state();
            if !state.available {
                return Err(RadioError::Unavailable);
            }
            state.scanning = true;
            state.scan_generation += 1;
            state.scan_generation
        };
        tracing::debug!(mode = ?config.mode, "simulated scan started");
        self.spawn_advertiser(generation, config.service_uuids.clone());
        Ok(())
    }

    fn stop_scan(&self) {
        self.state().scanning = false;
    }

    fn connect(&self, link: ConnectionId, address: DeviceAddress) -> Result<(), RadioError> {
        let status = {
            let mut state = self.state();
            if !state.available {
                return Err(RadioError::Unavailable);
            }
            match state.peripheral(address).map(|p| p.fail_connect) {
                None => GattStatus::GATT_ERROR,
                Some(Some(status)) => status,
                Some(None) => {
                    state.links.insert(
                        link,
                        Link {
                            address,
                            connected: true,
                            subscribed: HashSet::new(),
                        },
                    );
                    GattStatus::SUCCESS
                }
            }
        };
        tracing::debug!(%address, status = %status, "simulated connect");
        self.post(RadioEvent::LinkStateChanged {
            link,
            connected: status.is_success(),
            status,
        });
        Ok(())
    }

    fn disconnect(&self, link: ConnectionId) {
        let was_connected = match self.state().links.get_mut(&link) {
            Some(entry) if entry.connected => {
                entry.connected = false;
                entry.subscribed.clear();
                true
            }
            _ => false,
        };
        if was_connected {
            self.post(RadioEvent::LinkStateChanged {
                link,
                connected: false,
                status: GattStatus::LOCAL_TERMINATED,
            });
        }
    }

    fn close(&self, link: ConnectionId) {
        let mut state = self.state();
        state.links.remove(&link);
        if state.closed.len() == CLOSED_HISTORY {
            state.closed.pop_front();
        }
        state.closed.push_back(link);
    }

    fn discover_services(&self, link: ConnectionId) -> Result<(), RadioError> {
        let services = self.state().connected(link)?.services.clone();
        self.post(RadioEvent::ServicesDiscovered {
            link,
            status: GattStatus::SUCCESS,
            services,
        });
        Ok(())
    }

    fn request_mtu(&self, link: ConnectionId, mtu: u16) -> Result<(), RadioError> {
        let event = match self.state().connected(link)?.mtu {
            Some(supported) => RadioEvent::MtuChanged {
                link,
                status: GattStatus::SUCCESS,
                mtu: supported.min(mtu),
            },
            None => RadioEvent::MtuChanged {
                link,
                status: GattStatus::REQUEST_NOT_SUPPORTED,
                mtu: DEFAULT_MTU,
            },
        };
        self.post(event);
        Ok(())
    }

    fn read_characteristic(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
    ) -> Result<(), RadioError> {
        let (status, value) = {
            let state = self.state();
            let peripheral = state.connected(link)?;
            if let Some(status) = peripheral.status_overrides.get(&characteristic) {
                (*status, Vec::new())
            } else {
                match find_characteristic(&peripheral.services, characteristic) {
                    None => (GattStatus::GATT_ERROR, Vec::new()),
                    Some(c) if !c.properties.readable => {
                        (GattStatus::READ_NOT_PERMITTED, Vec::new())
                    }
                    Some(_) => (
                        GattStatus::SUCCESS,
                        peripheral
                            .values
                            .get(&characteristic)
                            .cloned()
                            .unwrap_or_default(),
                    ),
                }
            }
        };
        self.post(RadioEvent::CharacteristicRead {
            link,
            characteristic,
            status,
            value,
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
        let status = {
            let mut state = self.state();
            let address = state.connected_address(link)?;
            let Some(peripheral) = state.peripheral_mut(address) else {
                return Err(RadioError::Rejected(GattStatus::FAILURE));
            };
            if let Some(status) = peripheral.status_overrides.get(&characteristic) {
                *status
            } else if payload.len() > MAX_ATTRIBUTE_LEN {
                GattStatus::INVALID_ATTRIBUTE_LENGTH
            } else {
                peripheral.values.insert(characteristic, payload.to_vec());
                GattStatus::SUCCESS
            }
        };
        if mode == WriteMode::WithResponse {
            self.post(RadioEvent::CharacteristicWritten {
                link,
                characteristic,
                status,
            });
        }
        Ok(())
    }

    fn write_descriptor(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        {
            let mut state = self.state();
            state.connected(link)?;
            if descriptor == CCCD_UUID {
                if let Some(entry) = state.links.get_mut(&link) {
                    if payload == DISABLE_NOTIFICATION_VALUE.as_slice() {
                        entry.subscribed.remove(&characteristic);
                    } else {
                        entry.subscribed.insert(characteristic);
                    }
                }
            }
        }
        self.post(RadioEvent::DescriptorWritten {
            link,
            characteristic,
            descriptor,
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }

    fn set_notification_routing(
        &self,
        link: ConnectionId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), RadioError> {
        let state = self.state();
        let peripheral = state.connected(link)?;
        if enabled && find_characteristic(&peripheral.services, characteristic).is_none() {
            return Err(RadioError::Rejected(GattStatus::FAILURE));
        }
        Ok(())
    }
}
