//! Lifecycle-gated delivery.
//!
//! A [`LifecycleOwner`] reports whether its consumer is active; [`when_active`]
//! wraps any stream so values only reach that consumer during active windows,
//! with a one-slot buffer bridging the inactive ones.

/// One-slot gated stream transform.
pub mod gate;
/// Activity signal source and observer.
pub mod owner;

pub use gate::{when_active, DeliveryMode, GateConfig, GatedStream, WhenActiveExt};
pub use owner::{LifecycleEvent, LifecycleObserver, LifecycleOwner, LifecycleSource, Phase};
