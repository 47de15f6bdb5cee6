//! Per-subscriber stream handle.
//!
//! Each [`Subscription`] owns the receiving end of its own unbounded queue and
//! unregisters itself from the store's channel when dropped.

use std::fmt;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::Stream;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::state::State;

use super::channel::StateChannel;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A live, ordered, lossless stream of committed state values.
///
/// The first item is the value that was current when the subscription was
/// created; every later commit follows in commit order. The stream ends once
/// the store shuts down (or its worker terminates) and the buffered values
/// have been drained.
///
/// Dropping the subscription unregisters it.
#[derive(Debug)]
pub struct Subscription<S: State> {
    id: SubscriptionId,
    rx: UnboundedReceiver<S>,
    channel: Weak<StateChannel<S>>,
}

// Never pin-projected: polling goes through `&mut self.rx`.
impl<S: State> Unpin for Subscription<S> {}

impl<S: State> Subscription<S> {
    pub(crate) fn new(id: SubscriptionId, rx: UnboundedReceiver<S>, channel: Weak<StateChannel<S>>) -> Self {
        Self { id, rx, channel }
    }

    /// The id backing this subscription.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next value, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<S> {
        self.rx.recv().await
    }

    /// Receive the next value without waiting.
    ///
    /// Returns `Ok(None)` when nothing is buffered and
    /// `Err(StoreError::SubscriptionClosed)` once the stream has ended.
    pub fn try_recv(&mut self) -> StoreResult<Option<S>> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StoreError::SubscriptionClosed),
        }
    }

    /// Blocking receive for threads outside an async runtime.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_recv(&mut self) -> Option<S> {
        self.rx.blocking_recv()
    }

    /// Explicit unregistration. Idempotent.
    ///
    /// Values already buffered can still be received; nothing new arrives.
    pub fn unsubscribe(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.unsubscribe(self.id);
        }
        self.channel = Weak::new();
    }
}

impl<S: State> Stream for Subscription<S> {
    type Item = S;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<S: State> Drop for Subscription<S> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.unsubscribe(self.id);
        }
    }
}
