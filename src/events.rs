//! Explicit event subscription
//!
//! Components publish events to an [`EventBus`]; consumers hold a
//! [`Subscription`] whose [`SubscriptionId`] stays stable until they
//! unsubscribe (or drop the subscription).

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::trace;

/// Stable identity of a registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionId(u64);

struct BusInner<T> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<T>)>,
}

/// Fan-out of events to registered subscribers
///
/// Cloning the bus yields another handle to the same subscriber list, so a
/// background task can emit while the owner keeps accepting subscriptions.
pub(crate) struct EventBus<T> {
    inner: Arc<Mutex<BusInner<T>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventBus<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusInner<T>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a new subscriber
    pub(crate) fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, tx));
        Subscription { id, rx }
    }

    /// Remove a subscriber; unknown ids are ignored
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl<T: Clone> EventBus<T> {
    /// Deliver an event to every live subscriber, pruning closed ones
    pub(crate) fn emit(&self, event: T) {
        let mut inner = self.lock();
        inner.subscribers.retain(|(id, tx)| {
            let delivered = tx.send(event.clone()).is_ok();
            if !delivered {
                trace!(subscription = id.0, "Pruning closed subscriber");
            }
            delivered
        });
    }
}

/// Receiving end of a subscription
pub(crate) struct Subscription<T> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event; `None` once every emitter is gone
    pub(crate) async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_ne!(a.id(), b.id());

        bus.emit(7u32);
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.unsubscribe(a.id());
        bus.emit("hello");

        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, Some("hello"));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        drop(sub);
        bus.emit(1u8);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_events_arrive_in_emission_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        for i in 0..5u8 {
            bus.emit(i);
        }
        let received: Vec<u8> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }
}
