//! Pool configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of instances per agent kind.
    pub max_agents_per_type: usize,

    /// Bounded wait of the dispatcher on an empty queue (milliseconds).
    pub take_timeout_ms: u64,

    /// Upper bound on the pause after a failed acquisition (milliseconds).
    /// The dispatcher wakes earlier when an instance is released.
    pub requeue_backoff_ms: u64,

    /// Cleanup sweep period (seconds).
    pub sweep_interval_secs: u64,

    /// Idle instances unused for longer than this are evicted (seconds).
    pub idle_timeout_secs: u64,

    /// Errored instances untouched for longer than this are rehabilitated
    /// (seconds).
    pub error_cooldown_secs: u64,

    /// Load above which the selector looks for a less loaded kind.
    pub load_threshold: f64,

    /// Bounded join wait on shutdown (seconds).
    pub shutdown_timeout_secs: u64,

    /// Enforce per-task `timeout_secs` and `max_retries`.
    pub enforce_task_limits: bool,

    /// Settings handed to the agent factory on every construction.
    pub agent_settings: HashMap<String, String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_agents_per_type: 10,
            take_timeout_ms: 1000,
            requeue_backoff_ms: 100,
            sweep_interval_secs: 60,
            idle_timeout_secs: 600,
            error_cooldown_secs: 300,
            load_threshold: 0.8,
            shutdown_timeout_secs: 5,
            enforce_task_limits: false,
            agent_settings: HashMap::new(),
        }
    }
}

impl PoolConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pool cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_agents_per_type == 0 {
            return Err(ConfigError::Invalid(
                "max_agents_per_type must be at least 1".to_string(),
            ));
        }
        if !(self.load_threshold > 0.0 && self.load_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "load_threshold must be in (0, 1], got {}",
                self.load_threshold
            )));
        }
        if self.take_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "take_timeout_ms must be positive".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn take_timeout(&self) -> Duration {
        Duration::from_millis(self.take_timeout_ms)
    }

    pub fn requeue_backoff(&self) -> Duration {
        Duration::from_millis(self.requeue_backoff_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
