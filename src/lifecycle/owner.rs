//! Activity signal source.
//!
//! A [`LifecycleOwner`] is driven by the embedding application (a screen being
//! foregrounded, a connection coming up) and fans out edge events to every
//! observer. Events are queued per observer, never conflated, so a quick
//! inactive/active flicker is still seen as two edges.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Phase of a lifecycle owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Values are buffered, not delivered.
    Inactive,
    /// Values are delivered.
    Active,
    /// Terminal. No further edges are emitted.
    Terminated,
}

/// Edge between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Inactive to active.
    BecameActive,
    /// Active to inactive.
    BecameInactive,
    /// Any phase to terminated.
    Terminated,
}

impl LifecycleEvent {
    /// Phase entered by this edge.
    #[must_use]
    pub const fn target(self) -> Phase {
        match self {
            Self::BecameActive => Phase::Active,
            Self::BecameInactive => Phase::Inactive,
            Self::Terminated => Phase::Terminated,
        }
    }
}

/// Anything that can report an activity phase and its edges.
pub trait LifecycleSource: Send + Sync {
    /// Snapshot the current phase and subscribe to every later edge.
    fn observe(&self) -> LifecycleObserver;
}

/// Current phase at observation time plus the ordered stream of later edges.
#[derive(Debug)]
pub struct LifecycleObserver {
    initial: Phase,
    rx: UnboundedReceiver<LifecycleEvent>,
}

impl LifecycleObserver {
    /// Build an observer from a phase and an edge receiver.
    ///
    /// For custom [`LifecycleSource`] implementations.
    #[must_use]
    pub fn new(initial: Phase, rx: UnboundedReceiver<LifecycleEvent>) -> Self {
        Self { initial, rx }
    }

    /// Phase at the moment of observation.
    #[must_use]
    pub const fn initial(&self) -> Phase {
        self.initial
    }

    /// Next edge, or `None` once the source is gone or terminated.
    pub async fn next_event(&mut self) -> Option<LifecycleEvent> {
        self.rx.recv().await
    }
}

#[derive(Debug)]
struct OwnerInner {
    phase: Phase,
    observers: Vec<UnboundedSender<LifecycleEvent>>,
}

/// In-process lifecycle owner. Cloning yields another handle to the same owner.
#[derive(Debug, Clone)]
pub struct LifecycleOwner {
    inner: Arc<Mutex<OwnerInner>>,
}

impl Default for LifecycleOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleOwner {
    /// Create an owner in the inactive phase.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_in(Phase::Inactive)
    }

    /// Create an owner that is already active.
    #[must_use]
    pub fn active() -> Self {
        Self::starting_in(Phase::Active)
    }

    fn starting_in(phase: Phase) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OwnerInner {
                phase,
                observers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OwnerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Enter the active phase. Returns true if an edge was emitted.
    pub fn activate(&self) -> bool {
        self.emit(LifecycleEvent::BecameActive)
    }

    /// Enter the inactive phase. Returns true if an edge was emitted.
    pub fn deactivate(&self) -> bool {
        self.emit(LifecycleEvent::BecameInactive)
    }

    /// Terminate the owner. Every observer sees a final `Terminated` edge and
    /// then the end of its stream. Returns true on the first call only.
    pub fn terminate(&self) -> bool {
        self.emit(LifecycleEvent::Terminated)
    }

    fn emit(&self, event: LifecycleEvent) -> bool {
        let mut inner = self.lock();
        let target = event.target();
        if inner.phase == Phase::Terminated {
            debug!(?event, "ignoring lifecycle edge after terminate");
            return false;
        }
        if inner.phase == target {
            return false;
        }

        inner.phase = target;
        inner.observers.retain(|tx| tx.send(event).is_ok());
        if target == Phase::Terminated {
            inner.observers.clear();
        }
        debug!(?event, observers = inner.observers.len(), "lifecycle edge");
        true
    }
}

impl LifecycleSource for LifecycleOwner {
    fn observe(&self) -> LifecycleObserver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if inner.phase != Phase::Terminated {
            inner.observers.push(tx);
        }
        LifecycleObserver::new(inner.phase, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observer_sees_every_edge_in_order() {
        let owner = LifecycleOwner::new();
        let mut obs = owner.observe();
        assert_eq!(obs.initial(), Phase::Inactive);

        assert!(owner.activate());
        assert!(owner.deactivate());
        assert!(owner.activate());
        assert!(owner.terminate());

        assert_eq!(obs.next_event().await, Some(LifecycleEvent::BecameActive));
        assert_eq!(obs.next_event().await, Some(LifecycleEvent::BecameInactive));
        assert_eq!(obs.next_event().await, Some(LifecycleEvent::BecameActive));
        assert_eq!(obs.next_event().await, Some(LifecycleEvent::Terminated));
        assert_eq!(obs.next_event().await, None);
    }

    #[test]
    fn same_phase_emits_nothing() {
        let owner = LifecycleOwner::active();
        assert_eq!(owner.phase(), Phase::Active);
        assert!(!owner.activate());
        assert!(owner.deactivate());
        assert!(!owner.deactivate());
    }

    #[test]
    fn edges_after_terminate_are_ignored() {
        let owner = LifecycleOwner::new();
        assert!(owner.terminate());
        assert!(!owner.terminate());
        assert!(!owner.activate());
        assert_eq!(owner.phase(), Phase::Terminated);
    }

    #[tokio::test]
    async fn observing_a_terminated_owner_ends_immediately() {
        let owner = LifecycleOwner::new();
        owner.terminate();
        let mut obs = owner.observe();
        assert_eq!(obs.initial(), Phase::Terminated);
        assert_eq!(obs.next_event().await, None);
    }

    #[test]
    fn clones_share_phase() {
        let owner = LifecycleOwner::new();
        let handle = owner.clone();
        handle.activate();
        assert_eq!(owner.phase(), Phase::Active);
    }
}
