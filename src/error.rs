//! Error types for kyro-state.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! specific condition (a store that was shut down versus one whose worker died,
//! a gate created outside a runtime, a malformed configuration).

use thiserror::Error;

/// Errors reported by the state store and its subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("State store has been shut down")]
    ShutDown,

    #[error("State store worker terminated after a failed step")]
    Terminated,

    #[error("State store worker panicked: {message}")]
    WorkerPanicked {
        message: String,
    },

    #[error("Failed to spawn state store worker: {message}")]
    WorkerSpawn {
        message: String,
    },

    #[error("Subscription closed")]
    SubscriptionClosed,
}

/// Errors reported when wrapping a stream in a lifecycle gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("Lifecycle gate requires a running tokio runtime")]
    NoRuntime,
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {message}")]
    Parse {
        message: String,
    },

    #[error("Invalid configuration field '{field}': {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },
}

/// Top-level error type for kyro-state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KyroStateError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gate error: {0}")]
    Gate(#[from] GateError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl KyroStateError {
    /// Returns true if this is a store error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if this is a gate error.
    #[must_use]
    pub const fn is_gate(&self) -> bool {
        matches!(self, Self::Gate(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if the store can no longer accept submissions.
    #[must_use]
    pub const fn is_store_closed(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::ShutDown | StoreError::Terminated | StoreError::WorkerPanicked { .. })
        )
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for gate construction.
pub type GateResult<T> = Result<T, GateError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias spanning every kyro-state error.
pub type KyroStateResult<T> = Result<T, KyroStateError>;
