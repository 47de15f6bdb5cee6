//! The state value contract.

/// Marker for values that can be held by a [`StateStore`](crate::StateStore).
///
/// A state value is an immutable snapshot: the store never mutates one in
/// place, it replaces it with the result of a reducer. Equality decides whether
/// a reducer's result is a commit or a no-op.
pub trait State: Clone + PartialEq + Send + Sync + 'static {}

impl<T> State for T where T: Clone + PartialEq + Send + Sync + 'static {}
