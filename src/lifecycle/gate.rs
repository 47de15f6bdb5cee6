//! Lifecycle-gated stream transform.
//!
//! Wraps any stream so that the consumer only sees values while a
//! [`LifecycleSource`] is active. Two tasks feed one shared cell:
//!
//! - the pump drains upstream into the pending slot (last value wins) for the
//!   whole life of the gate, whatever the phase;
//! - the driver follows lifecycle edges and makes the activation-time
//!   emission decision.
//!
//! A value leaves the pending slot only when the consumer polls while the gate
//! is active, under the same lock the driver takes to change phase. Nothing is
//! in flight between the gate and the consumer, so a deactivation can neither
//! leak a value into an inactive window nor lose one.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, trace};

use crate::error::{GateError, GateResult};
use crate::state::State;

use super::owner::{LifecycleEvent, LifecycleObserver, LifecycleSource, Phase};

/// What is emitted immediately when the gate becomes active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Emit the value buffered while inactive, or failing that the last value
    /// delivered, so the consumer always gets something on activation.
    #[default]
    RedeliverOnStart,
    /// Emit the buffered value only if it differs from the last value
    /// delivered; otherwise stay silent until upstream produces a new value.
    UniqueOnly,
}

/// Per-gate configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig<T> {
    /// Activation-time delivery policy.
    pub mode: DeliveryMode,
    /// Last value a previous consumer received, if this gate replaces one.
    pub last_delivered: Option<T>,
}

impl<T> Default for GateConfig<T> {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::default(),
            last_delivered: None,
        }
    }
}

impl<T> GateConfig<T> {
    /// Configuration with the given mode and no prior delivery.
    #[must_use]
    pub const fn new(mode: DeliveryMode) -> Self {
        Self {
            mode,
            last_delivered: None,
        }
    }

    /// Seed the last delivered value.
    #[must_use]
    pub fn with_last_delivered(mut self, value: T) -> Self {
        self.last_delivered = Some(value);
        self
    }
}

#[derive(Debug)]
struct GateState<T> {
    phase: Phase,
    /// Next value for the consumer: the newest undelivered upstream value, or
    /// the activation-time redelivery.
    pending: Option<T>,
    last_delivered: Option<T>,
    waker: Option<Waker>,
}

#[derive(Debug)]
struct Gate<T> {
    state: Mutex<GateState<T>>,
}

impl<T: State> Gate<T> {
    fn new(last_delivered: Option<T>) -> Self {
        Self {
            state: Mutex::new(GateState {
                phase: Phase::Inactive,
                pending: None,
                last_delivered,
                waker: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer an upstream value, overwriting any pending one.
    fn offer(&self, value: T) {
        let waker = {
            let mut state = self.lock();
            if state.phase == Phase::Terminated {
                return;
            }
            state.pending = Some(value);
            if state.phase == Phase::Active {
                state.waker.take()
            } else {
                None
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn activate(&self, mode: DeliveryMode) {
        let waker = {
            let mut state = self.lock();
            if state.phase != Phase::Inactive {
                return;
            }
            state.phase = Phase::Active;
            match mode {
                DeliveryMode::RedeliverOnStart => {
                    if state.pending.is_none() {
                        state.pending = state.last_delivered.clone();
                    }
                }
                DeliveryMode::UniqueOnly => {
                    if state.pending.is_some() && state.pending == state.last_delivered {
                        state.pending = None;
                    }
                }
            }
            debug!(?mode, pending = state.pending.is_some(), "gate active");
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn deactivate(&self) {
        let mut state = self.lock();
        if state.phase == Phase::Active {
            state.phase = Phase::Inactive;
            debug!(holding = state.pending.is_some(), "gate inactive");
        }
    }

    fn terminate(&self) {
        let waker = {
            let mut state = self.lock();
            state.phase = Phase::Terminated;
            state.pending = None;
            state.waker.take()
        };
        debug!("gate terminated");
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut state = self.lock();
        match state.phase {
            Phase::Terminated => Poll::Ready(None),
            Phase::Active if state.pending.is_some() => {
                let value = state.pending.take();
                state.last_delivered.clone_from(&value);
                Poll::Ready(value)
            }
            Phase::Active | Phase::Inactive => {
                if !state.waker.as_ref().is_some_and(|w| w.will_wake(cx.waker())) {
                    state.waker = Some(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }

    fn last_delivered(&self) -> Option<T> {
        self.lock().last_delivered.clone()
    }
}

/// Aborts the task when dropped.
#[derive(Debug)]
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Consumer side of a lifecycle gate.
///
/// Ends after the lifecycle source terminates. Dropping it stops every task
/// the gate started.
#[derive(Debug)]
pub struct GatedStream<T: State> {
    gate: Arc<Gate<T>>,
    _driver: TaskGuard,
}

impl<T: State> GatedStream<T> {
    /// Receive the next gated value, or `None` once the gate has terminated.
    pub async fn recv(&mut self) -> Option<T> {
        self.next().await
    }

    /// Last value handed to the consumer, including a seeded one.
    #[must_use]
    pub fn last_delivered(&self) -> Option<T> {
        self.gate.last_delivered()
    }
}

impl<T: State> Stream for GatedStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.gate.poll_take(cx)
    }
}

/// Gate `upstream` on `source`.
///
/// Must be called from within a tokio runtime; the gate's tasks are spawned on
/// it. The gate starts active if `source` is active right now.
pub fn when_active<St, L>(upstream: St, source: &L, config: GateConfig<St::Item>) -> GateResult<GatedStream<St::Item>>
where
    St: Stream + Send + 'static,
    St::Item: State,
    L: LifecycleSource + ?Sized,
{
    let handle = Handle::try_current().map_err(|_| GateError::NoRuntime)?;

    let observer = source.observe();
    let gate = Arc::new(Gate::new(config.last_delivered));

    let pump = TaskGuard(handle.spawn(pump(upstream, Arc::clone(&gate))));
    let driver = TaskGuard(handle.spawn(drive(observer, Arc::clone(&gate), config.mode, pump)));

    Ok(GatedStream { gate, _driver: driver })
}

/// Adapter methods for gating any stream.
pub trait WhenActiveExt: Stream + Sized {
    /// Gate this stream on `source` with the given delivery mode.
    fn when_active<L>(self, source: &L, mode: DeliveryMode) -> GateResult<GatedStream<Self::Item>>
    where
        Self: Send + 'static,
        Self::Item: State,
        L: LifecycleSource + ?Sized,
    {
        when_active(self, source, GateConfig::new(mode))
    }

    /// Gate this stream on `source` with a full configuration.
    fn when_active_with<L>(self, source: &L, config: GateConfig<Self::Item>) -> GateResult<GatedStream<Self::Item>>
    where
        Self: Send + 'static,
        Self::Item: State,
        L: LifecycleSource + ?Sized,
    {
        when_active(self, source, config)
    }
}

impl<St: Stream> WhenActiveExt for St {}

async fn pump<St>(upstream: St, gate: Arc<Gate<St::Item>>)
where
    St: Stream,
    St::Item: State,
{
    let mut upstream = Box::pin(upstream);
    while let Some(value) = upstream.next().await {
        gate.offer(value);
    }
    trace!("upstream completed");
}

/// Follows lifecycle edges until terminate. Owns the pump, so returning (or
/// being aborted) releases the upstream.
async fn drive<T: State>(mut observer: LifecycleObserver, gate: Arc<Gate<T>>, mode: DeliveryMode, _pump: TaskGuard) {
    match observer.initial() {
        Phase::Active => gate.activate(mode),
        Phase::Inactive => {}
        Phase::Terminated => {
            gate.terminate();
            return;
        }
    }

    while let Some(event) = observer.next_event().await {
        match event {
            LifecycleEvent::BecameActive => gate.activate(mode),
            LifecycleEvent::BecameInactive => gate.deactivate(),
            LifecycleEvent::Terminated => break,
        }
    }
    gate.terminate();
}
