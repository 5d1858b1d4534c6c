//! Event bus port: publish/subscribe for central events.

use blelink_domain::event::Event;

/// Publishes central events to interested subscribers.
///
/// Publishing never blocks and never fails from the core's point of view:
/// the actor must not stall on a slow consumer.
pub trait EventPublisher: Send + Sync {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: Event);
}

impl<T: EventPublisher> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: Event) {
        (**self).publish(event);
    }
}
