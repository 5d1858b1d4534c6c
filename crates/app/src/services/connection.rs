//! Connection state machine for a single peripheral.
//!
//! A [`Connection`] owns the radio link it opened, the operation queue and
//! the notification routes for that link. It reacts to radio events that the
//! central has already matched to its [`ConnectionId`]; stale events never
//! reach it.
//!
//! Every exit path ends in `Disconnected` through [`Connection::finish`],
//! which closes the link. The `link_released` flag keeps that close to a
//! single call whatever the order of drops, failures and disconnect
//! requests.

use std::sync::Arc;
use std::time::Duration;

use blelink_domain::address::DeviceAddress;
use blelink_domain::connection::{ConnectionInfo, ConnectionState};
use blelink_domain::error::BleError;
use blelink_domain::event::{Event, EventPayload};
use blelink_domain::gatt::{DEFAULT_MTU, GattStatus, ServiceDescriptor};
use blelink_domain::id::ConnectionId;
use blelink_domain::operation::OperationKind;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::CentralConfig;
use crate::ports::{EventPublisher, Radio, RadioEvent};
use crate::services::notification_manager::{NotificationManager, Subscription};
use crate::services::operation_queue::{
    Completion, OperationQueue, OutcomeReceiver, read_operation, write_operation,
};

/// Resolved once the connection is `Ready`, or with the reason it never got
/// there.
pub type ReadyReply = oneshot::Sender<Result<ConnectionInfo, BleError>>;

/// Resolved once the connection reaches `Disconnected`.
pub type ClosedReply = oneshot::Sender<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Mtu,
    Disconnect,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    kind: TimerKind,
    deadline: Instant,
}

pub struct Connection<R, P> {
    id: ConnectionId,
    address: DeviceAddress,
    state: ConnectionState,
    mtu: u16,
    services: Vec<ServiceDescriptor>,
    target_mtu: u16,
    mtu_timeout: Duration,
    disconnect_timeout: Duration,
    timer: Option<Timer>,
    radio: Arc<R>,
    publisher: Arc<P>,
    queue: OperationQueue<R, P>,
    notifications: NotificationManager<P>,
    ready_waiter: Option<ReadyReply>,
    closed_waiters: Vec<ClosedReply>,
    link_released: bool,
}

impl<R: Radio, P: EventPublisher> Connection<R, P> {
    /// Create a connection to `address` in `Disconnected`; nothing is sent
    /// to the radio until [`connect`](Self::connect).
    pub fn new(
        address: DeviceAddress,
        radio: Arc<R>,
        publisher: Arc<P>,
        config: &CentralConfig,
    ) -> Self {
        let id = ConnectionId::new();
        Self {
            id,
            address,
            state: ConnectionState::Disconnected,
            mtu: DEFAULT_MTU,
            services: Vec::new(),
            target_mtu: config.target_mtu,
            mtu_timeout: config.mtu_timeout(),
            disconnect_timeout: config.disconnect_timeout(),
            timer: None,
            queue: OperationQueue::new(id, radio.clone(), publisher.clone()),
            notifications: NotificationManager::new(id, publisher.clone()),
            radio,
            publisher,
            ready_waiter: None,
            closed_waiters: Vec::new(),
            link_released: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    #[must_use]
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Link details, available from `Ready` on.
    #[must_use]
    pub fn info(&self) -> Option<ConnectionInfo> {
        (self.state == ConnectionState::Ready).then(|| ConnectionInfo {
            id: self.id,
            address: self.address,
            mtu: self.mtu,
            services: self.services.clone(),
        })
    }

    /// When the central must call [`on_deadline`](Self::on_deadline).
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.map(|timer| timer.deadline)
    }

    /// Open the link. `ready` resolves when the connection is usable.
    #[tracing::instrument(skip(self, ready), fields(connection = %self.id, address = %self.address))]
    pub fn connect(&mut self, ready: ReadyReply) {
        if !self.transition(ConnectionState::Connecting) {
            let _ = ready.send(Err(BleError::AlreadyConnected));
            return;
        }
        self.ready_waiter = Some(ready);
        if let Err(err) = self.radio.connect(self.id, self.address) {
            self.fail(err.status());
        }
    }

    /// Tear the link down on request.
    ///
    /// `closed` resolves once `Disconnected` is reached. A connect attempt
    /// still in progress is abandoned at once.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::NotConnected`] when already terminal.
    pub fn disconnect(&mut self, closed: ClosedReply) -> Result<(), BleError> {
        match self.state {
            state if state.is_terminal() => return Err(BleError::NotConnected),
            ConnectionState::Disconnecting => {}
            ConnectionState::Connecting => {
                tracing::info!(connection = %self.id, "connect attempt abandoned");
                self.transition(ConnectionState::Disconnecting);
                self.cancel_pending(BleError::Cancelled);
                self.radio.disconnect(self.id);
                self.closed_waiters.push(closed);
                self.finish();
                return Ok(());
            }
            _ => {
                tracing::info!(connection = %self.id, "disconnect requested");
                self.transition(ConnectionState::Disconnecting);
                self.cancel_pending(BleError::Cancelled);
                self.radio.disconnect(self.id);
                self.timer = Some(Timer {
                    kind: TimerKind::Disconnect,
                    deadline: Instant::now() + self.disconnect_timeout,
                });
            }
        }
        self.closed_waiters.push(closed);
        Ok(())
    }

    /// Drop the link without waiting for the radio. Used when the central
    /// stops.
    pub fn shutdown(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if self.state != ConnectionState::Disconnecting {
            self.transition(ConnectionState::Disconnecting);
            self.cancel_pending(BleError::Cancelled);
            self.radio.disconnect(self.id);
        }
        self.finish();
    }

    /// The radio is gone; nothing more will be reported for this link.
    /// Queued operations resolve as cancelled and the link is released.
    pub fn on_radio_lost(&mut self) {
        self.fail(GattStatus::FAILURE);
    }

    /// A timer set by this connection expired.
    pub fn on_deadline(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        match (timer.kind, self.state) {
            (TimerKind::Mtu, ConnectionState::NegotiatingMtu) => {
                tracing::warn!(connection = %self.id, mtu = self.mtu, "MTU negotiation timed out");
                self.become_ready();
            }
            (TimerKind::Disconnect, ConnectionState::Disconnecting) => {
                tracing::warn!(connection = %self.id, "radio did not confirm disconnect");
                self.finish();
            }
            _ => {}
        }
    }

    /// Apply an event the radio reported for this link.
    pub fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::LinkStateChanged {
                connected, status, ..
            } => self.on_link_state(connected, status),
            RadioEvent::ServicesDiscovered {
                status, services, ..
            } => self.on_services_discovered(status, services),
            RadioEvent::MtuChanged { status, mtu, .. } => self.on_mtu_changed(status, mtu),
            RadioEvent::CharacteristicRead {
                characteristic,
                status,
                value,
                ..
            } => self.complete(OperationKind::Read, characteristic, status, Some(value)),
            RadioEvent::CharacteristicWritten {
                characteristic,
                status,
                ..
            } => self.complete(OperationKind::Write, characteristic, status, None),
            RadioEvent::DescriptorWritten {
                characteristic,
                status,
                ..
            } => self.complete(OperationKind::WriteDescriptor, characteristic, status, None),
            RadioEvent::CharacteristicChanged {
                characteristic,
                value,
                ..
            } => {
                if self.state == ConnectionState::Ready {
                    self.notifications.on_value(characteristic, value);
                } else {
                    tracing::trace!(connection = %self.id, state = %self.state, "value outside ready state, ignored");
                }
            }
            RadioEvent::AdvertisementReceived { .. } | RadioEvent::ScanFailed { .. } => {}
        }
    }

    /// Queue a read of `characteristic`.
    ///
    /// # Errors
    ///
    /// [`BleError::TransportUnavailable`] once the radio is gone,
    /// [`BleError::NotReady`] outside `Ready`, or a capability error from
    /// [`read_operation`].
    pub fn read(&mut self, characteristic: Uuid) -> Result<OutcomeReceiver, BleError> {
        self.ensure_ready()?;
        let operation = read_operation(&self.services, characteristic)?;
        let (completion, outcome) = Completion::respond();
        self.queue.enqueue(operation, completion)?;
        Ok(outcome)
    }

    /// Queue a write of `payload` to `characteristic`.
    ///
    /// # Errors
    ///
    /// [`BleError::TransportUnavailable`] once the radio is gone,
    /// [`BleError::NotReady`] outside `Ready`, or a capability error from
    /// [`write_operation`].
    pub fn write(
        &mut self,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) -> Result<OutcomeReceiver, BleError> {
        self.ensure_ready()?;
        let operation = write_operation(&self.services, characteristic, payload)?;
        let (completion, outcome) = Completion::respond();
        self.queue.enqueue(operation, completion)?;
        Ok(outcome)
    }

    /// # Errors
    ///
    /// [`BleError::TransportUnavailable`], [`BleError::NotReady`], or the
    /// errors of [`NotificationManager::enable`].
    pub fn enable_notifications(
        &mut self,
        characteristic: Uuid,
    ) -> Result<(OutcomeReceiver, Subscription), BleError> {
        self.ensure_ready()?;
        self.notifications
            .enable(&self.services, characteristic, &mut self.queue)
    }

    /// # Errors
    ///
    /// [`BleError::TransportUnavailable`], [`BleError::NotReady`], or the
    /// errors of [`NotificationManager::disable`].
    pub fn disable_notifications(
        &mut self,
        characteristic: Uuid,
    ) -> Result<OutcomeReceiver, BleError> {
        self.ensure_ready()?;
        self.notifications
            .disable(&self.services, characteristic, &mut self.queue)
    }

    fn ensure_ready(&self) -> Result<(), BleError> {
        if !self.radio.is_available() {
            return Err(BleError::TransportUnavailable);
        }
        if self.state.accepts_operations() {
            Ok(())
        } else {
            Err(BleError::NotReady { state: self.state })
        }
    }

    fn complete(
        &mut self,
        kind: OperationKind,
        characteristic: Uuid,
        status: GattStatus,
        value: Option<Vec<u8>>,
    ) {
        self.queue
            .on_operation_complete(kind, characteristic, status, value);
        self.notifications.settle(&mut self.queue);
    }

    fn on_link_state(&mut self, connected: bool, status: GattStatus) {
        match (self.state, connected) {
            (_, true) if !status.is_success() => self.fail(status),
            (ConnectionState::Connecting, true) => {
                tracing::info!(connection = %self.id, address = %self.address, "link established");
                self.transition(ConnectionState::ServicesDiscovering);
                if let Err(err) = self.radio.discover_services(self.id) {
                    self.fail(err.status());
                }
            }
            (state, true) => {
                tracing::warn!(connection = %self.id, %state, "unexpected link-up, ignored");
            }
            (ConnectionState::Disconnecting, false) => self.finish(),
            (ConnectionState::Ready, false) => {
                tracing::info!(connection = %self.id, %status, "link dropped");
                self.transition(ConnectionState::Disconnecting);
                self.cancel_pending(BleError::Cancelled);
                self.finish();
            }
            (state, false) if state.is_terminal() => {}
            (_, false) => {
                let status = if status.is_success() {
                    GattStatus::FAILURE
                } else {
                    status
                };
                self.fail(status);
            }
        }
    }

    fn on_services_discovered(&mut self, status: GattStatus, services: Vec<ServiceDescriptor>) {
        if self.state != ConnectionState::ServicesDiscovering {
            tracing::warn!(connection = %self.id, state = %self.state, "unexpected discovery result, ignored");
            return;
        }
        if !status.is_success() {
            self.fail(status);
            return;
        }

        tracing::debug!(connection = %self.id, services = services.len(), "services discovered");
        self.services = services;
        self.transition(ConnectionState::NegotiatingMtu);
        match self.radio.request_mtu(self.id, self.target_mtu) {
            Ok(()) => {
                self.timer = Some(Timer {
                    kind: TimerKind::Mtu,
                    deadline: Instant::now() + self.mtu_timeout,
                });
            }
            Err(err) => {
                tracing::warn!(connection = %self.id, error = %err, "MTU request refused, keeping default");
                self.become_ready();
            }
        }
    }

    fn on_mtu_changed(&mut self, status: GattStatus, mtu: u16) {
        if self.state != ConnectionState::NegotiatingMtu {
            tracing::warn!(connection = %self.id, state = %self.state, "unexpected MTU result, ignored");
            return;
        }
        if status.is_success() {
            self.mtu = mtu;
        } else {
            tracing::warn!(connection = %self.id, %status, mtu = self.mtu, "MTU negotiation failed, keeping current MTU");
        }
        self.become_ready();
    }

    fn become_ready(&mut self) {
        self.timer = None;
        if !self.transition(ConnectionState::Ready) {
            return;
        }
        tracing::info!(
            connection = %self.id,
            address = %self.address,
            mtu = self.mtu,
            services = self.services.len(),
            "connection ready"
        );
        if let (Some(waiter), Some(info)) = (self.ready_waiter.take(), self.info()) {
            let _ = waiter.send(Ok(info));
        }
    }

    fn fail(&mut self, status: GattStatus) {
        if self.state.is_terminal() {
            return;
        }
        tracing::error!(
            connection = %self.id,
            address = %self.address,
            %status,
            state = %self.state,
            "link failed"
        );
        self.transition(ConnectionState::Failed);
        self.publisher
            .publish(Event::new(EventPayload::ConnectionFailed {
                connection: self.id,
                address: self.address,
                status,
            }));
        self.cancel_pending(BleError::LinkFailed { status });
        self.finish();
    }

    fn cancel_pending(&mut self, reason: BleError) {
        self.timer = None;
        self.queue.teardown();
        self.notifications.clear();
        if let Some(waiter) = self.ready_waiter.take() {
            let _ = waiter.send(Err(reason));
        }
    }

    fn finish(&mut self) {
        self.timer = None;
        self.release();
        if self.transition(ConnectionState::Disconnected) {
            tracing::info!(connection = %self.id, address = %self.address, "disconnected");
        }
        for waiter in self.closed_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn release(&mut self) {
        if self.link_released {
            return;
        }
        self.link_released = true;
        self.radio.close(self.id);
    }

    fn transition(&mut self, to: ConnectionState) -> bool {
        if !self.state.can_transition_to(to) {
            tracing::warn!(connection = %self.id, from = %self.state, %to, "illegal transition refused");
            return false;
        }
        let from = std::mem::replace(&mut self.state, to);
        tracing::debug!(connection = %self.id, %from, %to, "connection state changed");
        self.publisher
            .publish(Event::new(EventPayload::ConnectionStateChanged {
                connection: self.id,
                address: self.address,
                from,
                to,
            }));
        true
    }
}
