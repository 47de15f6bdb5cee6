//! Single-writer state store and its multicast channel.
//!
//! The store serializes `mutate` and `read` submissions through one queue
//! drained by a dedicated worker, and publishes every committed value to a
//! lossless multicast channel that replays the current value to each new
//! subscriber.

/// Multicast channel with per-subscriber queues.
mod channel;
/// Store configuration.
pub mod config;
/// Store engine and worker.
pub mod engine;
/// Queued jobs.
mod job;
/// Subscriber stream handle.
pub mod subscription;

pub use config::{FailurePolicy, StoreConfig};
pub use engine::{StateStore, StoreMetrics, StoreStatus};
pub use subscription::{Subscription, SubscriptionId};
