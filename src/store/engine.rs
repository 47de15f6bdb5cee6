//! Serializing state store.
//!
//! Every `mutate` and `read` lands in one unbounded FIFO. A dedicated worker
//! thread drains it one job per step: snapshot the current value, run the
//! callback, and for a mutation compare and publish. Only that worker runs
//! steps, so each step is atomic with respect to the current value and the
//! service order is the arrival order.
//!
//! In synchronous mode there is no worker: every submission enqueues and then
//! runs exactly one step inline on the caller's thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::error::{KyroStateResult, StoreError, StoreResult};
use crate::state::State;

use super::channel::StateChannel;
use super::config::{FailurePolicy, StoreConfig};
use super::job::{panic_message, Job};
use super::subscription::Subscription;

/// Lifecycle status of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    /// Accepting and servicing submissions.
    Running,
    /// `shutdown()` was called.
    ShutDown,
    /// A callback panicked under [`FailurePolicy::Terminate`].
    Terminated,
}

impl StoreStatus {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::ShutDown => 1,
            Self::Terminated => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::ShutDown,
            _ => Self::Terminated,
        }
    }
}

/// Point-in-time counters for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreMetrics {
    /// Reducers whose result replaced the current value.
    pub commits: u64,
    /// Reducers whose result equalled the current value.
    pub skipped: u64,
    /// Readers invoked.
    pub reads: u64,
    /// Live subscriptions.
    pub subscribers: usize,
}

struct Shared<S> {
    channel: Arc<StateChannel<S>>,
    policy: FailurePolicy,
    status: AtomicU8,
    failure: Mutex<Option<String>>,
    commits: AtomicU64,
    skipped: AtomicU64,
    reads: AtomicU64,
}

impl<S: State> Shared<S> {
    fn status(&self) -> StoreStatus {
        StoreStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn transition(&self, to: StoreStatus) -> bool {
        self.status
            .compare_exchange(
                StoreStatus::Running.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn check_running(&self) -> StoreResult<()> {
        match self.status() {
            StoreStatus::Running => Ok(()),
            StoreStatus::ShutDown => Err(StoreError::ShutDown),
            StoreStatus::Terminated => Err(StoreError::Terminated),
        }
    }

    fn run_step(&self, job: Job<S>) {
        let kind = job.kind();
        let current = self.channel.snapshot();
        match job {
            Job::Mutate(reducer) => {
                let next = reducer(current.as_ref());
                if next == *current {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                    trace!(kind, "reducer left state unchanged; publish skipped");
                } else {
                    let reached = self.channel.publish(next);
                    self.commits.fetch_add(1, Ordering::Relaxed);
                    trace!(kind, subscribers = reached, "state committed");
                }
            }
            Job::Read(reader) => {
                reader(current.as_ref());
                self.reads.fetch_add(1, Ordering::Relaxed);
                trace!(kind, "reader serviced");
            }
        }
    }

    /// Runs one step under the failure policy.
    ///
    /// Under `Terminate` a panic marks the store terminated, closes every
    /// subscription, and resumes unwinding into whoever ran the step.
    fn flush_once(&self, job: Job<S>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_step(job)));
        let Err(payload) = outcome else {
            return;
        };

        let message = panic_message(payload.as_ref());
        match self.policy {
            FailurePolicy::SkipStep => {
                error!(%message, "state store callback panicked; step skipped");
            }
            FailurePolicy::Terminate => {
                error!(%message, "state store callback panicked; terminating store");
                if let Ok(mut failure) = self.failure.lock() {
                    failure.get_or_insert(message);
                }
                self.transition(StoreStatus::Terminated);
                self.channel.close();
                panic::resume_unwind(payload);
            }
        }
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|f| f.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-writer reactive state store.
///
/// `mutate` and `read` never block and are serviced strictly in arrival
/// order, so a `read` submitted after a run of `mutate`s always observes all
/// of them. `current` is an unsynchronized latest-snapshot read; use `read`
/// when ordering against earlier submissions matters.
///
/// A panicking callback terminates the store under the default
/// [`FailurePolicy::Terminate`]: later submissions return
/// [`StoreError::Terminated`] and every subscription ends.
///
/// Dropping the store shuts it down.
pub struct StateStore<S: State> {
    shared: Arc<Shared<S>>,
    tx: Mutex<Option<Sender<Job<S>>>>,
    inline_rx: Option<Receiver<Job<S>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: State> StateStore<S> {
    /// Create a store with the default configuration.
    pub fn new(initial: S) -> KyroStateResult<Self> {
        Self::with_config(initial, StoreConfig::default())
    }

    /// Create a store. Starts the worker thread unless `config.synchronous`.
    pub fn with_config(initial: S, config: StoreConfig) -> KyroStateResult<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            channel: StateChannel::new(initial),
            policy: config.failure_policy,
            status: AtomicU8::new(StoreStatus::Running.as_u8()),
            failure: Mutex::new(None),
            commits: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        });

        let (tx, rx) = unbounded::<Job<S>>();

        let (inline_rx, worker) = if config.synchronous {
            debug!("state store running in synchronous mode");
            (Some(rx), None)
        } else {
            let thread_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(config.worker_name.clone())
                .spawn(move || worker_loop(&thread_shared, &rx))
                .map_err(|e| StoreError::WorkerSpawn {
                    message: e.to_string(),
                })?;
            debug!(worker = %config.worker_name, "state store worker started");
            (None, Some(handle))
        };

        Ok(Self {
            shared,
            tx: Mutex::new(Some(tx)),
            inline_rx,
            worker: Mutex::new(worker),
        })
    }

    /// Queue a reducer. Never blocks.
    ///
    /// When serviced, the reducer runs against the state current at that
    /// moment. A result equal to its input is not published.
    pub fn mutate<F>(&self, reducer: F) -> StoreResult<()>
    where
        F: FnOnce(&S) -> S + Send + 'static,
    {
        self.submit(Job::Mutate(Box::new(reducer)))
    }

    /// Queue a reader. Never blocks.
    ///
    /// When serviced, the reader is invoked exactly once with the state current
    /// at that moment, after every submission that preceded it.
    pub fn read<F>(&self, reader: F) -> StoreResult<()>
    where
        F: FnOnce(&S) + Send + 'static,
    {
        self.submit(Job::Read(Box::new(reader)))
    }

    fn submit(&self, job: Job<S>) -> StoreResult<()> {
        self.shared.check_running()?;
        {
            let guard = lock(&self.tx);
            let Some(tx) = guard.as_ref() else {
                return Err(StoreError::ShutDown);
            };
            // The worker only drops its receiver after terminating.
            tx.send(job).map_err(|_| StoreError::Terminated)?;
        }

        if let Some(rx) = &self.inline_rx {
            if let Ok(job) = rx.try_recv() {
                self.shared.flush_once(job);
            }
        }
        Ok(())
    }

    /// Latest committed value.
    #[must_use]
    pub fn current(&self) -> S {
        self.shared.channel.current()
    }

    /// Stream of committed values, starting with the current one.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<S> {
        self.shared.channel.subscribe()
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> StoreStatus {
        self.shared.status()
    }

    /// Returns true while submissions are accepted.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status() == StoreStatus::Running
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.channel.subscriber_count()
    }

    /// Snapshot of the store counters.
    #[must_use]
    pub fn metrics(&self) -> StoreMetrics {
        StoreMetrics {
            commits: self.shared.commits.load(Ordering::Relaxed),
            skipped: self.shared.skipped.load(Ordering::Relaxed),
            reads: self.shared.reads.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    /// Stop the store.
    ///
    /// Queued jobs that have not started are dropped without being invoked,
    /// every subscription ends once drained, and the worker is joined (unless
    /// this is called from a callback running on the worker itself).
    /// Idempotent. Returns [`StoreError::WorkerPanicked`] if the store had
    /// terminated because a callback panicked.
    pub fn shutdown(&self) -> StoreResult<()> {
        if self.shared.transition(StoreStatus::ShutDown) {
            debug!("state store shutting down");
        }

        // Disconnect the queue so an idle worker wakes up and exits.
        drop(lock(&self.tx).take());
        self.shared.channel.close();

        if let Some(rx) = &self.inline_rx {
            let discarded = rx.try_iter().count();
            if discarded > 0 {
                debug!(discarded, "discarded queued jobs on shutdown");
            }
        }

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // Joining ourselves would deadlock; the loop exits after this step.
                debug!("shutdown requested from the worker thread; not joining");
            } else if handle.join().is_err() {
                debug!("state store worker exited by panic");
            }
        }

        match self.shared.failure() {
            Some(message) => Err(StoreError::WorkerPanicked { message }),
            None => Ok(()),
        }
    }
}

impl<S: State> Drop for StateStore<S> {
    fn drop(&mut self) {
        // Deterministic shutdown: stop the worker and join its thread.
        let _ = self.shutdown();
    }
}

impl<S: State + std::fmt::Debug> std::fmt::Debug for StateStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("current", &self.current())
            .field("status", &self.status())
            .field("synchronous", &self.inline_rx.is_some())
            .finish_non_exhaustive()
    }
}

fn worker_loop<S: State>(shared: &Shared<S>, rx: &Receiver<Job<S>>) {
    while let Ok(job) = rx.recv() {
        if shared.status() != StoreStatus::Running {
            let discarded = 1 + rx.len();
            debug!(discarded, "discarded queued jobs on shutdown");
            break;
        }
        shared.flush_once(job);
    }
    debug!("state store worker stopped");
}
