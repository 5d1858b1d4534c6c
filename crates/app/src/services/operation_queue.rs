//! GATT operation queue.
//!
//! A link accepts a single outstanding GATT request; a second one issued
//! before the first completes is dropped by the stack without notice. The
//! queue therefore holds every operation for a link, dispatches them one at
//! a time in submission order, and only moves on once the radio reports the
//! completion of the one in flight (or the radio refused it outright).
//!
//! Local steps that need no radio round trip (notification routing
//! registration, unacknowledged writes) complete at dispatch time and
//! release the slot immediately.

use std::collections::VecDeque;
use std::sync::Arc;

use blelink_domain::error::BleError;
use blelink_domain::event::{Event, EventPayload};
use blelink_domain::gatt::{GattStatus, ServiceDescriptor, find_characteristic};
use blelink_domain::id::{ConnectionId, OperationId};
use blelink_domain::operation::{Operation, OperationKind, OperationOutcome, WriteMode};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::ports::{EventPublisher, Radio, RadioError};

pub type OutcomeSender = oneshot::Sender<OperationOutcome>;
pub type OutcomeReceiver = oneshot::Receiver<OperationOutcome>;

/// How an operation's outcome is delivered.
#[derive(Debug)]
pub enum Completion {
    /// Hand the outcome to the caller.
    Respond(OutcomeSender),
    /// Run `next` straight after this operation, ahead of anything queued
    /// since, and hand the caller the outcome of `next`. With
    /// `require_success`, a failure of this operation ends the chain and
    /// is reported instead.
    Chain {
        next: Operation,
        require_success: bool,
        respond: OutcomeSender,
    },
}

impl Completion {
    /// A plain completion and the receiver its outcome arrives on.
    #[must_use]
    pub fn respond() -> (Self, OutcomeReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self::Respond(tx), rx)
    }

    #[must_use]
    pub fn chain(next: Operation, require_success: bool) -> (Self, OutcomeReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Chain {
                next,
                require_success,
                respond: tx,
            },
            rx,
        )
    }
}

#[derive(Debug)]
struct QueuedOperation {
    id: OperationId,
    operation: Operation,
    completion: Completion,
}

enum Dispatch {
    /// The radio accepted the request; a completion event will follow.
    Awaiting,
    /// Finished without a radio round trip.
    Done(OperationOutcome),
}

/// Per-link FIFO of GATT operations with one slot in flight.
pub struct OperationQueue<R, P> {
    link: ConnectionId,
    radio: Arc<R>,
    publisher: Arc<P>,
    pending: VecDeque<QueuedOperation>,
    in_flight: Option<QueuedOperation>,
    closed: bool,
}

impl<R: Radio, P: EventPublisher> OperationQueue<R, P> {
    /// Create an empty queue dispatching to `radio` on behalf of `link`.
    pub fn new(link: ConnectionId, radio: Arc<R>, publisher: Arc<P>) -> Self {
        Self {
            link,
            radio,
            publisher,
            pending: VecDeque::new(),
            in_flight: None,
            closed: false,
        }
    }

    /// Append an operation, dispatching it at once if the link is idle.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::NotConnected`] once the queue has been torn down.
    pub fn enqueue(
        &mut self,
        operation: Operation,
        completion: Completion,
    ) -> Result<OperationId, BleError> {
        if self.closed {
            return Err(BleError::NotConnected);
        }
        let id = OperationId::new();
        tracing::debug!(
            connection = %self.link,
            operation = %id,
            kind = %operation.kind(),
            uuid = %operation.characteristic(),
            pending = self.pending.len(),
            "operation queued"
        );
        self.pending.push_back(QueuedOperation {
            id,
            operation,
            completion,
        });
        self.pump();
        Ok(id)
    }

    /// Resolve the operation in flight with the radio's result and move on.
    ///
    /// A completion that does not match the operation in flight (wrong kind
    /// or characteristic, or nothing in flight) is logged and dropped.
    pub fn on_operation_complete(
        &mut self,
        kind: OperationKind,
        characteristic: Uuid,
        status: GattStatus,
        value: Option<Vec<u8>>,
    ) {
        let matches = self.in_flight.as_ref().is_some_and(|queued| {
            queued.operation.kind() == kind && queued.operation.characteristic() == characteristic
        });
        if !matches {
            tracing::warn!(
                connection = %self.link,
                %kind,
                uuid = %characteristic,
                %status,
                "completion does not match the operation in flight, ignored"
            );
            return;
        }
        if let Some(done) = self.in_flight.take() {
            let outcome = OperationOutcome::from_status(status, value);
            self.resolve(done, outcome);
        }
        self.pump();
    }

    /// Cancel the operation in flight, then every pending one in submission
    /// order. Later enqueues fail with `NotConnected`.
    pub fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let cancelled = usize::from(self.in_flight.is_some()) + self.pending.len();
        if let Some(queued) = self.in_flight.take() {
            self.resolve(queued, OperationOutcome::Cancelled);
        }
        while let Some(queued) = self.pending.pop_front() {
            self.resolve(queued, OperationOutcome::Cancelled);
        }
        if cancelled > 0 {
            tracing::debug!(connection = %self.link, cancelled, "operation queue torn down");
        }
    }

    /// Kind of the operation holding the slot, if any.
    #[must_use]
    pub fn in_flight(&self) -> Option<OperationKind> {
        self.in_flight.as_ref().map(|queued| queued.operation.kind())
    }

    /// Operations waiting behind the one in flight.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether [`teardown`](Self::teardown) ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn pump(&mut self) {
        while self.in_flight.is_none() && !self.closed {
            let Some(queued) = self.pending.pop_front() else {
                break;
            };
            match self.dispatch(&queued.operation) {
                Dispatch::Awaiting => {
                    tracing::debug!(
                        connection = %self.link,
                        operation = %queued.id,
                        kind = %queued.operation.kind(),
                        "operation dispatched"
                    );
                    self.in_flight = Some(queued);
                }
                Dispatch::Done(outcome) => self.resolve(queued, outcome),
            }
        }
    }

    fn dispatch(&self, operation: &Operation) -> Dispatch {
        let link = self.link;
        let request = match operation {
            Operation::Read { characteristic } => {
                self.radio.read_characteristic(link, *characteristic)
            }
            Operation::Write {
                characteristic,
                payload,
                mode: WriteMode::WithResponse,
            } => self.radio.write_characteristic(
                link,
                *characteristic,
                payload,
                WriteMode::WithResponse,
            ),
            Operation::Write {
                characteristic,
                payload,
                mode: WriteMode::WithoutResponse,
            } => {
                return Dispatch::Done(local_outcome(self.radio.write_characteristic(
                    link,
                    *characteristic,
                    payload,
                    WriteMode::WithoutResponse,
                )));
            }
            Operation::WriteDescriptor {
                characteristic,
                descriptor,
                payload,
            } => self
                .radio
                .write_descriptor(link, *characteristic, *descriptor, payload),
            Operation::EnableNotification { characteristic } => {
                return Dispatch::Done(local_outcome(self.radio.set_notification_routing(
                    link,
                    *characteristic,
                    true,
                )));
            }
            Operation::DisableNotification { characteristic } => {
                return Dispatch::Done(local_outcome(self.radio.set_notification_routing(
                    link,
                    *characteristic,
                    false,
                )));
            }
        };

        match request {
            Ok(()) => Dispatch::Awaiting,
            Err(err) => {
                tracing::warn!(
                    connection = %link,
                    kind = %operation.kind(),
                    uuid = %operation.characteristic(),
                    error = %err,
                    "radio refused operation"
                );
                Dispatch::Done(err.outcome())
            }
        }
    }

    fn resolve(&mut self, queued: QueuedOperation, outcome: OperationOutcome) {
        if outcome.is_success() {
            tracing::debug!(
                connection = %self.link,
                operation = %queued.id,
                kind = %queued.operation.kind(),
                "operation completed"
            );
        } else {
            tracing::warn!(
                connection = %self.link,
                operation = %queued.id,
                kind = %queued.operation.kind(),
                uuid = %queued.operation.characteristic(),
                outcome = ?outcome,
                "operation failed"
            );
        }
        self.publisher
            .publish(Event::new(EventPayload::OperationCompleted {
                connection: self.link,
                operation: queued.id,
                kind: queued.operation.kind(),
                characteristic: queued.operation.characteristic(),
                outcome: outcome.clone(),
            }));

        match queued.completion {
            Completion::Respond(respond) => {
                let _ = respond.send(outcome);
            }
            Completion::Chain {
                next,
                require_success,
                respond,
            } => {
                if self.closed || (require_success && !outcome.is_success()) {
                    let _ = respond.send(outcome);
                } else {
                    self.pending.push_front(QueuedOperation {
                        id: OperationId::new(),
                        operation: next,
                        completion: Completion::Respond(respond),
                    });
                }
            }
        }
    }
}

fn local_outcome(result: Result<(), RadioError>) -> OperationOutcome {
    match result {
        Ok(()) => OperationOutcome::Success(None),
        Err(err) => err.outcome(),
    }
}

/// Build a read of `characteristic`.
///
/// # Errors
///
/// Returns [`BleError::CharacteristicNotFound`] when the characteristic was
/// not discovered, or [`BleError::Unsupported`] when it is not readable.
pub fn read_operation(
    services: &[ServiceDescriptor],
    characteristic: Uuid,
) -> Result<Operation, BleError> {
    let descriptor = find_characteristic(services, characteristic).ok_or(
        BleError::CharacteristicNotFound {
            uuid: characteristic,
        },
    )?;
    if !descriptor.properties.readable {
        return Err(BleError::Unsupported {
            uuid: characteristic,
        });
    }
    Ok(Operation::Read { characteristic })
}

/// Build a write of `payload`, acknowledged when the characteristic allows it.
///
/// # Errors
///
/// Returns [`BleError::CharacteristicNotFound`] when the characteristic was
/// not discovered, or [`BleError::NotWritable`] when it accepts neither
/// write mode.
pub fn write_operation(
    services: &[ServiceDescriptor],
    characteristic: Uuid,
    payload: Vec<u8>,
) -> Result<Operation, BleError> {
    let descriptor = find_characteristic(services, characteristic).ok_or(
        BleError::CharacteristicNotFound {
            uuid: characteristic,
        },
    )?;
    let mode = descriptor.write_mode().ok_or(BleError::NotWritable {
        uuid: characteristic,
    })?;
    Ok(Operation::Write {
        characteristic,
        payload,
        mode,
    })
}
