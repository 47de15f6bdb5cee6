//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// What the worker does when a reducer or reader panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The panic tears down the worker. The store becomes
    /// [`StoreStatus::Terminated`](super::StoreStatus::Terminated) and every
    /// later submission is rejected.
    ///
    /// This is the default, and it is sharp: one bad reducer takes the whole
    /// store down.
    #[default]
    Terminate,
    /// The panic is caught and logged, the step is abandoned with the state
    /// unchanged, and the worker moves on to the next job.
    SkipStep,
}

/// Configuration for a [`StateStore`](super::StateStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Run every flush step inline on the submitting thread instead of on a
    /// background worker. Intended for single-threaded tests.
    pub synchronous: bool,
    /// Behavior when a callback panics.
    pub failure_policy: FailurePolicy,
    /// Name given to the worker thread.
    pub worker_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            synchronous: false,
            failure_policy: FailurePolicy::Terminate,
            worker_name: "kyro-state-store".to_string(),
        }
    }
}

impl StoreConfig {
    /// Configuration for synchronous, inline flushing.
    #[must_use]
    pub fn synchronous() -> Self {
        Self {
            synchronous: true,
            ..Self::default()
        }
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Sets the worker thread name.
    #[must_use]
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker_name.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "worker_name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
