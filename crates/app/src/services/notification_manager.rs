//! Notification manager: turns value pushes on and off and routes them.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use blelink_domain::error::BleError;
use blelink_domain::event::{Event, EventPayload};
use blelink_domain::gatt::{
    CharacteristicDescriptor, DISABLE_NOTIFICATION_VALUE, ServiceDescriptor, find_characteristic,
};
use blelink_domain::id::ConnectionId;
use blelink_domain::operation::{Operation, OperationOutcome};
use tokio::sync::mpsc;
use tokio::sync::oneshot::error::TryRecvError;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::ports::{EventPublisher, Radio};
use crate::services::operation_queue::{
    Completion, OperationQueue, OutcomeReceiver, OutcomeSender,
};

type ValueSender = mpsc::UnboundedSender<Vec<u8>>;

/// Values pushed by the peripheral for one characteristic.
///
/// Ends (yields `None`) once notifications are disabled or the connection
/// goes away.
#[derive(Debug)]
pub struct Subscription {
    characteristic: Uuid,
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Subscription {
    #[must_use]
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    /// Wait for the next value, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }

    #[must_use]
    pub fn into_stream(self) -> UnboundedReceiverStream<Vec<u8>> {
        UnboundedReceiverStream::new(self.receiver)
    }
}

impl Stream for Subscription {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// An enable sequence still running in the queue.
struct PendingEnable {
    characteristic: Uuid,
    subscriber: ValueSender,
    outcome: OutcomeReceiver,
    respond: OutcomeSender,
}

/// Routing table for one link, plus the two-step enable/disable sequences.
pub struct NotificationManager<P> {
    link: ConnectionId,
    publisher: Arc<P>,
    routes: HashMap<Uuid, Vec<ValueSender>>,
    pending: Vec<PendingEnable>,
}

impl<P: EventPublisher> NotificationManager<P> {
    /// Create an empty routing table for `link`, publishing received values
    /// through `publisher`.
    pub fn new(link: ConnectionId, publisher: Arc<P>) -> Self {
        Self {
            link,
            publisher,
            routes: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Queue the local routing registration followed by the CCCD write.
    ///
    /// The descriptor write only runs if the registration succeeded; the
    /// receiver yields the outcome of the last step that ran. The returned
    /// subscription starts receiving values right away. When the sequence
    /// fails, the subscriber is dropped and routing is unregistered again
    /// (see [`settle`](Self::settle)).
    ///
    /// # Errors
    ///
    /// Returns [`BleError::CharacteristicNotFound`],
    /// [`BleError::Unsupported`] or [`BleError::DescriptorMissing`] before
    /// anything is queued, or [`BleError::NotConnected`] from the queue.
    pub fn enable<R: Radio>(
        &mut self,
        services: &[ServiceDescriptor],
        characteristic: Uuid,
        queue: &mut OperationQueue<R, P>,
    ) -> Result<(OutcomeReceiver, Subscription), BleError> {
        let descriptor = notifiable(services, characteristic)?;
        let cccd = descriptor.cccd.ok_or(BleError::DescriptorMissing {
            uuid: characteristic,
        })?;

        let (completion, outcome) = Completion::chain(
            Operation::WriteDescriptor {
                characteristic,
                descriptor: cccd,
                payload: descriptor.enable_value().to_vec(),
            },
            true,
        );
        queue.enqueue(Operation::EnableNotification { characteristic }, completion)?;

        let (subscriber, receiver) = mpsc::unbounded_channel();
        self.routes
            .entry(characteristic)
            .or_default()
            .push(subscriber.clone());
        let (respond, caller) = tokio::sync::oneshot::channel();
        self.pending.push(PendingEnable {
            characteristic,
            subscriber,
            outcome,
            respond,
        });
        tracing::debug!(connection = %self.link, uuid = %characteristic, "notifications requested");
        self.settle(queue);

        Ok((
            caller,
            Subscription {
                characteristic,
                receiver,
            },
        ))
    }

    /// Drop local routing, then write the disable value to the CCCD whatever
    /// the outcome of the first step.
    ///
    /// # Errors
    ///
    /// Same conditions as [`enable`](Self::enable).
    pub fn disable<R: Radio>(
        &mut self,
        services: &[ServiceDescriptor],
        characteristic: Uuid,
        queue: &mut OperationQueue<R, P>,
    ) -> Result<OutcomeReceiver, BleError> {
        let descriptor = notifiable(services, characteristic)?;
        let cccd = descriptor.cccd.ok_or(BleError::DescriptorMissing {
            uuid: characteristic,
        })?;

        let (completion, outcome) = Completion::chain(
            Operation::WriteDescriptor {
                characteristic,
                descriptor: cccd,
                payload: DISABLE_NOTIFICATION_VALUE.to_vec(),
            },
            false,
        );
        queue.enqueue(Operation::DisableNotification { characteristic }, completion)?;

        self.routes.remove(&characteristic);
        tracing::debug!(connection = %self.link, uuid = %characteristic, "notifications disabled");
        Ok(outcome)
    }

    /// Hand finished enable sequences to their callers.
    ///
    /// A failed sequence loses its subscriber, and the routing registration
    /// is dropped through the queue. Must run after anything that may have
    /// completed queued operations.
    pub fn settle<R: Radio>(&mut self, queue: &mut OperationQueue<R, P>) {
        let mut index = 0;
        while index < self.pending.len() {
            let outcome = match self.pending[index].outcome.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => {
                    index += 1;
                    continue;
                }
                Err(TryRecvError::Closed) => OperationOutcome::Cancelled,
            };
            let pending = self.pending.swap_remove(index);
            if !outcome.is_success() {
                self.roll_back(&pending, &outcome, queue);
            }
            let _ = pending.respond.send(outcome);
        }
    }

    fn roll_back<R: Radio>(
        &mut self,
        pending: &PendingEnable,
        outcome: &OperationOutcome,
        queue: &mut OperationQueue<R, P>,
    ) {
        let characteristic = pending.characteristic;
        if let Some(subscribers) = self.routes.get_mut(&characteristic) {
            subscribers.retain(|subscriber| !subscriber.same_channel(&pending.subscriber));
            if subscribers.is_empty() {
                self.routes.remove(&characteristic);
            }
        }
        if *outcome == OperationOutcome::Cancelled || self.routes.contains_key(&characteristic) {
            return;
        }
        tracing::debug!(connection = %self.link, uuid = %characteristic, ?outcome, "enabling failed, routing dropped");
        let (completion, _ignored) = Completion::respond();
        if let Err(err) = queue.enqueue(Operation::DisableNotification { characteristic }, completion)
        {
            tracing::debug!(connection = %self.link, error = %err, "routing not dropped");
        }
    }

    /// Deliver an unsolicited value to its subscribers and the event bus.
    pub fn on_value(&mut self, characteristic: Uuid, value: Vec<u8>) {
        if let Some(subscribers) = self.routes.get_mut(&characteristic) {
            subscribers.retain(|subscriber| subscriber.send(value.clone()).is_ok());
            if subscribers.is_empty() {
                self.routes.remove(&characteristic);
            }
        } else {
            tracing::trace!(connection = %self.link, uuid = %characteristic, "value without subscriber");
        }
        self.publisher
            .publish(Event::new(EventPayload::NotificationReceived {
                connection: self.link,
                characteristic,
                value,
            }));
    }

    /// Forget every route; open subscriptions end and enable sequences still
    /// running resolve as cancelled.
    pub fn clear(&mut self) {
        self.routes.clear();
        for mut pending in self.pending.drain(..) {
            let outcome = pending
                .outcome
                .try_recv()
                .unwrap_or(OperationOutcome::Cancelled);
            let _ = pending.respond.send(outcome);
        }
    }

    #[must_use]
    pub fn is_routed(&self, characteristic: Uuid) -> bool {
        self.routes.contains_key(&characteristic)
    }
}

fn notifiable(
    services: &[ServiceDescriptor],
    characteristic: Uuid,
) -> Result<&CharacteristicDescriptor, BleError> {
    let descriptor = find_characteristic(services, characteristic).ok_or(
        BleError::CharacteristicNotFound {
            uuid: characteristic,
        },
    )?;
    if !descriptor.supports_notifications() {
        return Err(BleError::Unsupported {
            uuid: characteristic,
        });
    }
    Ok(descriptor)
}
