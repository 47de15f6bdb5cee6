//! Multicast state channel.
//!
//! Holds the current value and a registry of subscriber-owned unbounded queues.
//! `publish` appends to every queue without waiting on any consumer, so a slow
//! subscriber lags but never loses a value. `subscribe` captures the current
//! value under the same lock that `publish` takes, which makes "first item is
//! the current value" exact: no commit can land between the capture and the
//! registration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::trace;

use crate::state::State;

use super::subscription::{Subscription, SubscriptionId};

#[derive(Debug)]
struct ChannelInner<S> {
    current: Arc<S>,
    subscribers: HashMap<SubscriptionId, UnboundedSender<S>>,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct StateChannel<S> {
    inner: Mutex<ChannelInner<S>>,
}

impl<S: State> StateChannel<S> {
    pub(crate) fn new(initial: S) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ChannelInner {
                current: Arc::new(initial),
                subscribers: HashMap::new(),
                closed: false,
            }),
        })
    }

    // Nothing runs user code while holding this lock, so a poisoned guard still
    // protects a consistent value.
    fn lock(&self) -> MutexGuard<'_, ChannelInner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cheap handle to the current value.
    pub(crate) fn snapshot(&self) -> Arc<S> {
        Arc::clone(&self.lock().current)
    }

    pub(crate) fn current(&self) -> S {
        S::clone(&self.snapshot())
    }

    /// Makes `value` current and appends it to every live subscriber's queue.
    ///
    /// Returns the number of subscribers that received it.
    pub(crate) fn publish(&self, value: S) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|id, tx| {
            let delivered = tx.send(value.clone()).is_ok();
            if !delivered {
                trace!(subscription_id = %id, "pruning disconnected subscriber");
            }
            delivered
        });
        inner.current = Arc::new(value);
        inner.subscribers.len()
    }

    /// Registers a new subscriber whose first item is the current value.
    ///
    /// On a closed channel the subscription yields the final value and ends.
    pub(crate) fn subscribe(self: &Arc<Self>) -> Subscription<S> {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.lock();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(S::clone(&inner.current));
        if !inner.closed {
            inner.subscribers.insert(id, tx);
        }
        drop(inner);

        trace!(subscription_id = %id, "subscriber registered");
        Subscription::new(id, rx, Arc::downgrade(self))
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().subscribers.remove(&id).is_some()
    }

    /// Drops every subscriber sender. Streams end once they drain.
    pub(crate) fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_replays_current_first() {
        let channel = StateChannel::new(1u32);
        channel.publish(2);
        let mut sub = channel.subscribe();
        assert_eq!(sub.try_recv().unwrap(), Some(2));
        assert_eq!(sub.try_recv().unwrap(), None);
    }

    #[test]
    fn publish_reaches_every_subscriber_in_order() {
        let channel = StateChannel::new(0u32);
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();
        for v in 1..=3 {
            assert_eq!(channel.publish(v), 2);
        }
        for sub in [&mut a, &mut b] {
            let got: Vec<u32> = std::iter::from_fn(|| sub.try_recv().unwrap()).collect();
            assert_eq!(got, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn dropped_subscription_unregisters() {
        let channel = StateChannel::new(0u32);
        let sub = channel.subscribe();
        assert_eq!(channel.subscriber_count(), 1);
        drop(sub);
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(channel.publish(1), 0);
    }

    #[test]
    fn close_ends_streams_after_drain() {
        let channel = StateChannel::new(0u32);
        let mut sub = channel.subscribe();
        channel.publish(1);
        channel.close();
        assert_eq!(sub.try_recv().unwrap(), Some(0));
        assert_eq!(sub.try_recv().unwrap(), Some(1));
        assert!(sub.try_recv().is_err());

        let mut late = channel.subscribe();
        assert_eq!(late.try_recv().unwrap(), Some(1));
        assert!(late.try_recv().is_err());
    }
}
