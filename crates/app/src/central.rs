//! The central actor.
//!
//! One task owns the scan controller and the current connection and is the
//! only code that touches them. Callers talk to it through a
//! [`CentralHandle`]; the radio talks to it through the radio event channel.
//! Radio events are drained before commands so that a command never acts on
//! state the radio has already moved past.
//!
//! ```text
//!  CentralHandle ──Command──►┐
//!                            ├──► Central task ──► Radio (fire-and-forget)
//!  Radio adapter ─RadioEvent─┘          │
//!                                       └──► EventPublisher
//! ```

use std::ops::ControlFlow;
use std::sync::Arc;

use blelink_domain::address::DeviceAddress;
use blelink_domain::connection::{ConnectionInfo, ConnectionState};
use blelink_domain::device::DeviceRecord;
use blelink_domain::error::BleError;
use blelink_domain::operation::OperationOutcome;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use uuid::Uuid;

use crate::config::{CentralConfig, ScanConfig};
use crate::ports::{EventPublisher, Radio, RadioEvent, RadioEventReceiver};
use crate::services::connection::{ClosedReply, Connection, ReadyReply};
use crate::services::notification_manager::Subscription;
use crate::services::operation_queue::OutcomeReceiver;
use crate::services::scan_controller::ScanController;

type Reply<T> = oneshot::Sender<T>;

/// Current connection state as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub address: Option<DeviceAddress>,
    /// Details of the connection that last reached `Ready`, kept after it
    /// ends.
    pub last_ready: Option<ConnectionInfo>,
}

enum Command {
    StartScan {
        config: ScanConfig,
        respond: Reply<Result<(), BleError>>,
    },
    StopScan {
        respond: Reply<()>,
    },
    Devices {
        respond: Reply<Vec<DeviceRecord>>,
    },
    Connect {
        address: DeviceAddress,
        respond: ReadyReply,
    },
    Disconnect {
        closed: ClosedReply,
        respond: Reply<Result<(), BleError>>,
    },
    Read {
        characteristic: Uuid,
        respond: Reply<Result<OutcomeReceiver, BleError>>,
    },
    Write {
        characteristic: Uuid,
        payload: Vec<u8>,
        respond: Reply<Result<OutcomeReceiver, BleError>>,
    },
    EnableNotifications {
        characteristic: Uuid,
        respond: Reply<Result<(OutcomeReceiver, Subscription), BleError>>,
    },
    DisableNotifications {
        characteristic: Uuid,
        respond: Reply<Result<OutcomeReceiver, BleError>>,
    },
    Status {
        respond: Reply<ConnectionStatus>,
    },
    Shutdown {
        respond: Reply<()>,
    },
}

/// The actor state. Built and spawned by [`Central::start`].
pub struct Central<R, P> {
    radio: Arc<R>,
    publisher: Arc<P>,
    config: CentralConfig,
    scan: ScanController<R, P>,
    connection: Option<Connection<R, P>>,
    last_ready: Option<ConnectionInfo>,
    commands: mpsc::Receiver<Command>,
    radio_events: RadioEventReceiver,
    radio_open: bool,
}

impl<R, P> Central<R, P>
where
    R: Radio + 'static,
    P: EventPublisher + 'static,
{
    /// Spawn the actor on the current tokio runtime.
    ///
    /// `radio_events` must be the receiving half of the channel `radio` posts
    /// its completions on.
    #[must_use]
    pub fn start(
        radio: Arc<R>,
        radio_events: RadioEventReceiver,
        publisher: Arc<P>,
        config: CentralConfig,
    ) -> CentralHandle {
        let (sender, commands) = mpsc::channel(config.command_capacity.max(1));
        let central = Self {
            scan: ScanController::new(
                radio.clone(),
                publisher.clone(),
                config.list_unnamed_devices,
            ),
            radio,
            publisher,
            config,
            connection: None,
            last_ready: None,
            commands,
            radio_events,
            radio_open: true,
        };
        tokio::spawn(central.run());
        CentralHandle { sender }
    }

    async fn run(mut self) {
        tracing::info!("central started");
        loop {
            let deadline = self.connection.as_ref().and_then(Connection::deadline);
            tokio::select! {
                biased;
                event = self.radio_events.recv(), if self.radio_open => match event {
                    Some(event) => self.handle_radio_event(event),
                    None => self.on_radio_lost(),
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.with_connection(Connection::on_deadline);
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).is_break() {
                            break;
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
            }
        }
        tracing::info!("central stopped");
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::StartScan { config, respond } => {
                let _ = respond.send(self.scan.start(&config));
            }
            Command::StopScan { respond } => {
                self.scan.stop();
                let _ = respond.send(());
            }
            Command::Devices { respond } => {
                let _ = respond.send(self.scan.devices());
            }
            Command::Connect { address, respond } => self.connect(address, respond),
            Command::Disconnect { closed, respond } => {
                let result = match self.connection.as_mut() {
                    Some(connection) => connection.disconnect(closed),
                    None => Err(BleError::NotConnected),
                };
                self.reap();
                let _ = respond.send(result);
            }
            Command::Read {
                characteristic,
                respond,
            } => {
                let _ = respond.send(self.current().and_then(|c| c.read(characteristic)));
            }
            Command::Write {
                characteristic,
                payload,
                respond,
            } => {
                let _ = respond.send(
                    self.current()
                        .and_then(|c| c.write(characteristic, payload)),
                );
            }
            Command::EnableNotifications {
                characteristic,
                respond,
            } => {
                let _ = respond.send(
                    self.current()
                        .and_then(|c| c.enable_notifications(characteristic)),
                );
            }
            Command::DisableNotifications {
                characteristic,
                respond,
            } => {
                let _ = respond.send(
                    self.current()
                        .and_then(|c| c.disable_notifications(characteristic)),
                );
            }
            Command::Status { respond } => {
                let _ = respond.send(ConnectionStatus {
                    state: self
                        .connection
                        .as_ref()
                        .map_or(ConnectionState::Disconnected, Connection::state),
                    address: self.connection.as_ref().map(Connection::address),
                    last_ready: self.last_ready.clone(),
                });
            }
            Command::Shutdown { respond } => {
                self.shutdown();
                let _ = respond.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    #[tracing::instrument(skip(self, respond))]
    fn connect(&mut self, address: DeviceAddress, respond: ReadyReply) {
        if !self.radio.is_available() {
            let _ = respond.send(Err(BleError::TransportUnavailable));
            return;
        }
        if self
            .connection
            .as_ref()
            .is_some_and(|c| !c.state().is_terminal())
        {
            let _ = respond.send(Err(BleError::AlreadyConnected));
            return;
        }
        if !self.scan.is_known(&address) {
            let _ = respond.send(Err(BleError::UnknownDevice { address }));
            return;
        }

        let mut connection = Connection::new(
            address,
            self.radio.clone(),
            self.publisher.clone(),
            &self.config,
        );
        connection.connect(respond);
        self.connection = Some(connection);
        self.reap();
    }

    fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::AdvertisementReceived {
                address,
                name,
                rssi,
            } => self.scan.on_advertisement(address, name, rssi),
            RadioEvent::ScanFailed { status } => self.scan.on_scan_failed(status),
            event => {
                let Some(connection) = self
                    .connection
                    .as_mut()
                    .filter(|c| event.link() == Some(c.id()))
                else {
                    tracing::warn!(link = ?event.link(), "event for a stale link, ignored");
                    return;
                };
                let before = connection.state();
                connection.handle_radio_event(event);
                let after = connection.state();

                if after == ConnectionState::Ready && before != ConnectionState::Ready {
                    self.last_ready = connection.info();
                }
                if before == ConnectionState::Connecting
                    && after == ConnectionState::ServicesDiscovering
                    && self.config.stop_scan_on_connect
                {
                    self.scan.stop();
                }
                self.reap();
            }
        }
    }

    fn on_radio_lost(&mut self) {
        tracing::error!("radio event channel closed");
        self.radio_open = false;
        self.scan.on_radio_lost();
        self.with_connection(Connection::on_radio_lost);
    }

    fn shutdown(&mut self) {
        self.scan.stop();
        self.with_connection(Connection::shutdown);
    }

    fn with_connection(&mut self, f: impl FnOnce(&mut Connection<R, P>)) {
        if let Some(connection) = self.connection.as_mut() {
            let before = connection.state();
            f(connection);
            if connection.state() == ConnectionState::Ready && before != ConnectionState::Ready {
                self.last_ready = connection.info();
            }
        }
        self.reap();
    }

    /// The connection GATT commands apply to. A radio that went away fails
    /// the command and the connection with it.
    fn current(&mut self) -> Result<&mut Connection<R, P>, BleError> {
        if !self.radio.is_available() {
            if self
                .connection
                .as_ref()
                .is_some_and(|c| !c.state().is_terminal())
            {
                tracing::warn!("radio unavailable, dropping the connection");
                self.with_connection(Connection::on_radio_lost);
            }
            return Err(BleError::TransportUnavailable);
        }
        self.connection.as_mut().ok_or(BleError::NotConnected)
    }

    /// Forget the connection once it is over.
    fn reap(&mut self) {
        if self
            .connection
            .as_ref()
            .is_some_and(|c| c.state().is_terminal())
        {
            self.connection = None;
        }
    }
}

/// Cloneable front door to a running [`Central`].
///
/// Every method fails with [`BleError::Shutdown`] once the actor has stopped.
/// The actor stops when [`shutdown`](Self::shutdown) is called or the last
/// handle is dropped.
#[derive(Clone)]
pub struct CentralHandle {
    sender: mpsc::Sender<Command>,
}

impl CentralHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, BleError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| BleError::Shutdown)?;
        rx.await.map_err(|_| BleError::Shutdown)
    }

    /// # Errors
    ///
    /// `AlreadyScanning`, `TransportUnavailable` or `ScanFailed`.
    pub async fn start_scan(&self, config: ScanConfig) -> Result<(), BleError> {
        self.request(|respond| Command::StartScan { config, respond })
            .await?
    }

    /// # Errors
    ///
    /// Only [`BleError::Shutdown`].
    pub async fn stop_scan(&self) -> Result<(), BleError> {
        self.request(|respond| Command::StopScan { respond }).await
    }

    /// The current device list, filtered as configured.
    ///
    /// # Errors
    ///
    /// Only [`BleError::Shutdown`].
    pub async fn devices(&self) -> Result<Vec<DeviceRecord>, BleError> {
        self.request(|respond| Command::Devices { respond }).await
    }

    /// Connect to a device seen by the current scan and wait for `Ready`.
    ///
    /// # Errors
    ///
    /// `TransportUnavailable`, `AlreadyConnected` or `UnknownDevice` up
    /// front; `LinkFailed` or `Cancelled` if the link never becomes ready.
    pub async fn connect(&self, address: DeviceAddress) -> Result<ConnectionInfo, BleError> {
        self.request(|respond| Command::Connect { address, respond })
            .await?
    }

    /// Disconnect and wait until the link is released.
    ///
    /// # Errors
    ///
    /// `NotConnected` when there is nothing to disconnect.
    pub async fn disconnect(&self) -> Result<(), BleError> {
        let (closed, closed_rx) = oneshot::channel();
        self.request(|respond| Command::Disconnect { closed, respond })
            .await??;
        closed_rx.await.map_err(|_| BleError::Shutdown)
    }

    /// Read a characteristic value.
    ///
    /// # Errors
    ///
    /// Precondition errors (`TransportUnavailable`, `NotConnected`,
    /// `NotReady`, `Unsupported`, `CharacteristicNotFound`) or the failed
    /// outcome of the read.
    pub async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, BleError> {
        let outcome = self
            .request(|respond| Command::Read {
                characteristic,
                respond,
            })
            .await??;
        Ok(wait(outcome).await?.unwrap_or_default())
    }

    /// Write a characteristic value. Unacknowledged writes resolve as soon as
    /// the radio accepts them.
    ///
    /// # Errors
    ///
    /// Precondition errors (`TransportUnavailable`, `NotConnected`,
    /// `NotReady`, `NotWritable`, `CharacteristicNotFound`) or the failed
    /// outcome of the write.
    pub async fn write(&self, characteristic: Uuid, payload: Vec<u8>) -> Result<(), BleError> {
        let outcome = self
            .request(|respond| Command::Write {
                characteristic,
                payload,
                respond,
            })
            .await??;
        wait(outcome).await.map(|_| ())
    }

    /// Turn on value pushes and subscribe to them.
    ///
    /// # Errors
    ///
    /// Precondition errors (`TransportUnavailable`, `NotConnected`,
    /// `NotReady`, `Unsupported`, `DescriptorMissing`) or the failed outcome
    /// of the CCCD sequence.
    pub async fn enable_notifications(
        &self,
        characteristic: Uuid,
    ) -> Result<Subscription, BleError> {
        let (outcome, subscription) = self
            .request(|respond| Command::EnableNotifications {
                characteristic,
                respond,
            })
            .await??;
        wait(outcome).await?;
        Ok(subscription)
    }

    /// # Errors
    ///
    /// Same preconditions as [`enable_notifications`](Self::enable_notifications).
    pub async fn disable_notifications(&self, characteristic: Uuid) -> Result<(), BleError> {
        let outcome = self
            .request(|respond| Command::DisableNotifications {
                characteristic,
                respond,
            })
            .await??;
        wait(outcome).await.map(|_| ())
    }

    /// # Errors
    ///
    /// Only [`BleError::Shutdown`].
    pub async fn state(&self) -> Result<ConnectionStatus, BleError> {
        self.request(|respond| Command::Status { respond }).await
    }

    /// Stop scanning, drop the link and end the actor.
    ///
    /// # Errors
    ///
    /// [`BleError::Shutdown`] if the actor had already stopped.
    pub async fn shutdown(&self) -> Result<(), BleError> {
        self.request(|respond| Command::Shutdown { respond }).await
    }
}

async fn wait(outcome: OutcomeReceiver) -> Result<Option<Vec<u8>>, BleError> {
    outcome
        .await
        .unwrap_or(OperationOutcome::Cancelled)
        .into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::ports::{RadioEventSender, radio_event_channel};
    use crate::testing::{
        BATTERY_LEVEL, CONTROL_POINT, FakeRadio, HEART_RATE_MEASUREMENT, RadioCall,
        RecordingPublisher, address, sample_services,
    };
    use blelink_domain::event::EventPayload;
    use blelink_domain::gatt::{DEFAULT_MTU, GattStatus};
    use blelink_domain::id::ConnectionId;

    struct Harness {
        handle: CentralHandle,
        radio: Arc<FakeRadio>,
        publisher: Arc<RecordingPublisher>,
        events: RadioEventSender,
    }

    fn start(config: CentralConfig) -> Harness {
        let radio = Arc::new(FakeRadio::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let (events, receiver) = radio_event_channel();
        let handle = Central::start(radio.clone(), receiver, publisher.clone(), config);
        Harness {
            handle,
            radio,
            publisher,
            events,
        }
    }

    impl Harness {
        /// Let the actor drain what was sent so far.
        async fn settle(&self) {
            self.handle.state().await.unwrap();
        }

        async fn scan_and_see_device(&self) {
            self.handle.start_scan(ScanConfig::default()).await.unwrap();
            self.events
                .send(RadioEvent::AdvertisementReceived {
                    address: address(),
                    name: Some("Sensor1".to_owned()),
                    rssi: Some(-60),
                })
                .unwrap();
            self.settle().await;
        }

        async fn link(&self) -> ConnectionId {
            loop {
                let connect = self.radio.calls().into_iter().find_map(|c| match c {
                    RadioCall::Connect { link, .. } => Some(link),
                    _ => None,
                });
                if let Some(link) = connect {
                    return link;
                }
                tokio::task::yield_now().await;
            }
        }

        fn send(&self, event: RadioEvent) {
            self.events.send(event).unwrap();
        }

        /// Connect, answering discovery and MTU like a peripheral would.
        async fn connect_ready(&self, mtu_status: GattStatus) -> ConnectionInfo {
            self.scan_and_see_device().await;
            let handle = self.handle.clone();
            let pending = tokio::spawn(async move { handle.connect(address()).await });
            let link = self.link().await;
            self.send(RadioEvent::LinkStateChanged {
                link,
                connected: true,
                status: GattStatus::SUCCESS,
            });
            self.send(RadioEvent::ServicesDiscovered {
                link,
                status: GattStatus::SUCCESS,
                services: sample_services(),
            });
            self.send(RadioEvent::MtuChanged {
                link,
                status: mtu_status,
                mtu: 247,
            });
            pending.await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn should_list_discovered_devices() {
        let h = start(CentralConfig::default());

        h.scan_and_see_device().await;

        let devices = h.handle.devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, address());
    }

    #[tokio::test]
    async fn should_reject_second_scan_when_already_scanning() {
        let h = start(CentralConfig::default());
        h.handle.start_scan(ScanConfig::default()).await.unwrap();

        let err = h.handle.start_scan(ScanConfig::default()).await.unwrap_err();

        assert!(matches!(err, BleError::AlreadyScanning));
    }

    #[tokio::test]
    async fn should_reject_connect_to_unknown_device() {
        let h = start(CentralConfig::default());

        let err = h.handle.connect(address()).await.unwrap_err();

        assert!(matches!(err, BleError::UnknownDevice { .. }));
        assert!(h.radio.calls().is_empty());
    }

    #[tokio::test]
    async fn should_reject_connect_when_radio_unavailable() {
        let h = start(CentralConfig::default());
        h.scan_and_see_device().await;
        h.radio.set_available(false);

        let err = h.handle.connect(address()).await.unwrap_err();

        assert!(matches!(err, BleError::TransportUnavailable));
    }

    #[tokio::test]
    async fn should_fail_operations_and_drop_link_when_radio_goes_away() {
        let h = start(CentralConfig::default());
        h.connect_ready(GattStatus::SUCCESS).await;
        h.radio.clear_calls();
        h.radio.set_available(false);

        let read = h.handle.read(BATTERY_LEVEL).await.unwrap_err();
        let write = h.handle.write(CONTROL_POINT, vec![1]).await.unwrap_err();

        assert!(matches!(read, BleError::TransportUnavailable));
        assert!(matches!(write, BleError::TransportUnavailable));
        assert_eq!(
            h.handle.state().await.unwrap().state,
            ConnectionState::Disconnected
        );
        assert_eq!(h.radio.count(|c| matches!(c, RadioCall::Close { .. })), 1);
        assert_eq!(h.radio.count(|c| matches!(c, RadioCall::Read { .. })), 0);
    }

    #[tokio::test]
    async fn should_reach_ready_and_stop_scan_when_connected() {
        let h = start(CentralConfig::default());

        let info = h.connect_ready(GattStatus::SUCCESS).await;

        assert_eq!(info.mtu, 247);
        assert_eq!(h.radio.count(|c| *c == RadioCall::StopScan), 1);
        let status = h.handle.state().await.unwrap();
        assert_eq!(status.state, ConnectionState::Ready);
        assert_eq!(status.last_ready, Some(info));
    }

    #[tokio::test]
    async fn should_keep_scanning_when_configured_not_to_stop() {
        let h = start(CentralConfig {
            stop_scan_on_connect: false,
            ..CentralConfig::default()
        });

        h.connect_ready(GattStatus::SUCCESS).await;

        assert_eq!(h.radio.count(|c| *c == RadioCall::StopScan), 0);
    }

    #[tokio::test]
    async fn should_reach_ready_with_default_mtu_when_negotiation_fails() {
        let h = start(CentralConfig::default());

        let info = h.connect_ready(GattStatus::GATT_ERROR).await;

        assert_eq!(info.mtu, DEFAULT_MTU);
        assert_eq!(info.services.len(), 2);
    }

    #[tokio::test]
    async fn should_reach_ready_when_mtu_answer_never_arrives() {
        let h = start(CentralConfig {
            mtu_timeout_ms: 10,
            ..CentralConfig::default()
        });
        h.scan_and_see_device().await;
        let handle = h.handle.clone();
        let pending = tokio::spawn(async move { handle.connect(address()).await });
        let link = h.link().await;
        h.send(RadioEvent::LinkStateChanged {
            link,
            connected: true,
            status: GattStatus::SUCCESS,
        });
        h.send(RadioEvent::ServicesDiscovered {
            link,
            status: GattStatus::SUCCESS,
            services: sample_services(),
        });

        let info = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(info.mtu, DEFAULT_MTU);
    }

    #[tokio::test]
    async fn should_reject_second_connect_when_connection_exists() {
        let h = start(CentralConfig::default());
        h.connect_ready(GattStatus::SUCCESS).await;

        let err = h.handle.connect(address()).await.unwrap_err();

        assert!(matches!(err, BleError::AlreadyConnected));
    }

    #[tokio::test]
    async fn should_fail_with_not_connected_when_no_connection() {
        let h = start(CentralConfig::default());

        let read = h.handle.read(BATTERY_LEVEL).await.unwrap_err();
        let disconnect = h.handle.disconnect().await.unwrap_err();

        assert!(matches!(read, BleError::NotConnected));
        assert!(matches!(disconnect, BleError::NotConnected));
    }

    #[tokio::test]
    async fn should_read_value_through_the_queue() {
        let h = start(CentralConfig::default());
        let info = h.connect_ready(GattStatus::SUCCESS).await;
        let handle = h.handle.clone();

        let pending = tokio::spawn(async move { handle.read(BATTERY_LEVEL).await });
        while h.radio.count(|c| matches!(c, RadioCall::Read { .. })) == 0 {
            tokio::task::yield_now().await;
        }
        h.send(RadioEvent::CharacteristicRead {
            link: info.id,
            characteristic: BATTERY_LEVEL,
            status: GattStatus::SUCCESS,
            value: vec![87],
        });

        assert_eq!(pending.await.unwrap().unwrap(), vec![87]);
    }

    #[tokio::test]
    async fn should_surface_permission_denied_from_write() {
        let h = start(CentralConfig::default());
        let info = h.connect_ready(GattStatus::SUCCESS).await;
        let handle = h.handle.clone();

        let pending = tokio::spawn(async move { handle.write(CONTROL_POINT, vec![1]).await });
        while h.radio.count(|c| matches!(c, RadioCall::Write { .. })) == 0 {
            tokio::task::yield_now().await;
        }
        h.send(RadioEvent::CharacteristicWritten {
            link: info.id,
            characteristic: CONTROL_POINT,
            status: GattStatus::WRITE_NOT_PERMITTED,
        });

        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            BleError::PermissionDenied
        ));
    }

    #[tokio::test]
    async fn should_reject_notifications_on_unsupported_characteristic_without_radio_calls() {
        let h = start(CentralConfig::default());
        h.connect_ready(GattStatus::SUCCESS).await;
        h.radio.clear_calls();

        let err = h
            .handle
            .enable_notifications(BATTERY_LEVEL)
            .await
            .unwrap_err();

        assert!(matches!(err, BleError::Unsupported { .. }));
        assert!(h.radio.calls().is_empty());
    }

    #[tokio::test]
    async fn should_deliver_notifications_after_enabling() {
        let h = start(CentralConfig::default());
        let info = h.connect_ready(GattStatus::SUCCESS).await;
        let handle = h.handle.clone();

        let pending =
            tokio::spawn(async move { handle.enable_notifications(HEART_RATE_MEASUREMENT).await });
        while h
            .radio
            .count(|c| matches!(c, RadioCall::WriteDescriptor { .. }))
            == 0
        {
            tokio::task::yield_now().await;
        }
        h.send(RadioEvent::DescriptorWritten {
            link: info.id,
            characteristic: HEART_RATE_MEASUREMENT,
            descriptor: blelink_domain::gatt::CCCD_UUID,
            status: GattStatus::SUCCESS,
        });
        let mut subscription = pending.await.unwrap().unwrap();
        h.send(RadioEvent::CharacteristicChanged {
            link: info.id,
            characteristic: HEART_RATE_MEASUREMENT,
            value: vec![0, 72],
        });

        assert_eq!(subscription.recv().await, Some(vec![0, 72]));
    }

    #[tokio::test]
    async fn should_release_link_once_and_report_disconnected_when_link_drops() {
        let h = start(CentralConfig::default());
        let info = h.connect_ready(GattStatus::SUCCESS).await;

        h.send(RadioEvent::LinkStateChanged {
            link: info.id,
            connected: false,
            status: GattStatus::REMOTE_TERMINATED,
        });
        h.send(RadioEvent::LinkStateChanged {
            link: info.id,
            connected: false,
            status: GattStatus::REMOTE_TERMINATED,
        });
        h.settle().await;

        assert_eq!(h.radio.count(|c| matches!(c, RadioCall::Close { .. })), 1);
        let status = h.handle.state().await.unwrap();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.address.is_none());
    }

    #[tokio::test]
    async fn should_disconnect_when_requested() {
        let h = start(CentralConfig::default());
        let info = h.connect_ready(GattStatus::SUCCESS).await;
        let handle = h.handle.clone();

        let pending = tokio::spawn(async move { handle.disconnect().await });
        while h
            .radio
            .count(|c| matches!(c, RadioCall::Disconnect { .. }))
            == 0
        {
            tokio::task::yield_now().await;
        }
        h.send(RadioEvent::LinkStateChanged {
            link: info.id,
            connected: false,
            status: GattStatus::LOCAL_TERMINATED,
        });

        pending.await.unwrap().unwrap();
        assert_eq!(h.radio.count(|c| matches!(c, RadioCall::Close { .. })), 1);
    }

    #[tokio::test]
    async fn should_ignore_events_for_stale_links() {
        let h = start(CentralConfig::default());
        h.connect_ready(GattStatus::SUCCESS).await;

        h.send(RadioEvent::LinkStateChanged {
            link: ConnectionId::new(),
            connected: false,
            status: GattStatus::REMOTE_TERMINATED,
        });
        h.settle().await;

        assert_eq!(
            h.handle.state().await.unwrap().state,
            ConnectionState::Ready
        );
    }

    #[tokio::test]
    async fn should_fail_connection_when_radio_channel_closes() {
        let h = start(CentralConfig::default());
        h.connect_ready(GattStatus::SUCCESS).await;
        let Harness {
            handle,
            radio,
            events,
            ..
        } = h;

        drop(events);
        handle.state().await.unwrap();

        assert_eq!(
            handle.state().await.unwrap().state,
            ConnectionState::Disconnected
        );
        assert_eq!(radio.count(|c| matches!(c, RadioCall::Close { .. })), 1);
    }

    #[tokio::test]
    async fn should_release_everything_when_shut_down() {
        let h = start(CentralConfig::default());
        h.connect_ready(GattStatus::SUCCESS).await;

        h.handle.shutdown().await.unwrap();

        assert_eq!(h.radio.count(|c| matches!(c, RadioCall::Close { .. })), 1);
        assert!(matches!(
            h.handle.state().await.unwrap_err(),
            BleError::Shutdown
        ));
        assert!(h.publisher.payloads().iter().any(|p| matches!(
            p,
            EventPayload::ConnectionStateChanged {
                to: ConnectionState::Disconnected,
                ..
            }
        )));
    }
}
