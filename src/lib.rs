//! # kyro-state - Single-Writer Reactive State
//!
//! kyro-state coordinates concurrent reads and mutations of an immutable
//! application state value, and gates delivery of that value to consumers that
//! come and go.
//!
//! ## Core Concepts
//!
//! - **StateStore**: serializes `mutate` and `read` submissions from any thread
//!   through one queue and one worker, so a `read` always observes every
//!   `mutate` submitted before it
//! - **Subscription**: lossless, ordered stream of committed values that starts
//!   with the value current at subscription time
//! - **LifecycleOwner**: external active/inactive signal
//! - **GatedStream**: a stream that only delivers while its owner is active,
//!   with a one-slot buffer and a redelivery policy for reactivation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kyro_state::{DeliveryMode, LifecycleOwner, StateStore, WhenActiveExt};
//!
//! #[derive(Clone, PartialEq)]
//! struct Counter { count: u32 }
//!
//! let store = StateStore::new(Counter { count: 0 })?;
//! store.mutate(|s| Counter { count: s.count + 1 })?;
//! store.read(|s| println!("count = {}", s.count))?;
//!
//! let owner = LifecycleOwner::new();
//! let mut gated = store.subscribe().when_active(&owner, DeliveryMode::RedeliverOnStart)?;
//! owner.activate();
//! let latest = gated.recv().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod lifecycle;
pub mod state;
pub mod store;

// Re-export primary types at crate root for convenience
pub use error::{
    ConfigError, ConfigResult, GateError, GateResult, KyroStateError, KyroStateResult, StoreError, StoreResult,
};
pub use lifecycle::{
    when_active, DeliveryMode, GateConfig, GatedStream, LifecycleEvent, LifecycleObserver, LifecycleOwner,
    LifecycleSource, Phase, WhenActiveExt,
};
pub use state::State;
pub use store::{FailurePolicy, StateStore, StoreConfig, StoreMetrics, StoreStatus, Subscription, SubscriptionId};
