//! # Engine Configuration
//!
//! Typed configuration for the scheduler, saga runner, retry coordinator and registry.
//!
//! ## Architecture
//!
//! - **Compiled defaults**: every section implements `Default`, so an empty file is valid
//! - **Layered loading**: defaults, then an optional file, then `SAGA__*` environment overrides
//! - **Explicit validation**: [`EngineConfig::validate`] rejects settings the engine cannot honour
//!
//! ## Usage
//!
//! ```rust,no_run
//! use saga_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("config/saga.toml")?;
//! let max_concurrent = manager.config().scheduler.max_concurrent_actions;
//! let timeout = manager.config().saga.action_timeout();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Admission gate and wait queue
    pub scheduler: SchedulerConfig,

    /// Saga deadlines and snapshot retention
    pub saga: SagaConfig,

    /// Backoff and retry configuration
    pub retry: RetryConfig,

    /// In-memory execution registry
    pub registry: RegistryConfig,

    /// Lifecycle event fan-out
    pub events: EventsConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of sagas holding the `executing` status at once
    pub max_concurrent_actions: usize,
    /// Interval of the periodic queue pass
    pub tick_interval_ms: u64,
    /// Maximum number of waiting requests; 0 disables the limit
    pub max_queue_size: usize,
    /// How long shutdown waits for in-flight sagas
    pub shutdown_grace_period_ms: u64,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }

    pub fn queue_capacity(&self) -> Option<usize> {
        (self.max_queue_size > 0).then_some(self.max_queue_size)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_actions: defaults::MAX_CONCURRENT_ACTIONS,
            tick_interval_ms: defaults::TICK_INTERVAL_MS,
            max_queue_size: defaults::MAX_QUEUE_SIZE,
            shutdown_grace_period_ms: defaults::SHUTDOWN_GRACE_PERIOD_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SagaConfig {
    /// Deadline for a whole saga attempt, including validation and step planning
    pub action_timeout_ms: u64,
    /// Deadline for a single step or compensation
    pub step_timeout_ms: u64,
    /// Lifetime of execution snapshots in the ephemeral store
    pub snapshot_ttl_seconds: u64,
}

impl SagaConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_seconds)
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: defaults::ACTION_TIMEOUT_MS,
            step_timeout_ms: defaults::STEP_TIMEOUT_MS,
            snapshot_ttl_seconds: defaults::SNAPSHOT_TTL_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Number of re-submissions after the first failed attempt
    pub max_retry_attempts: u32,
    pub base_delay_ms: u64,
    /// Upper bound applied to the exponential delay
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: defaults::MAX_RETRY_ATTEMPTS,
            base_delay_ms: defaults::BASE_DELAY_MS,
            max_delay_ms: defaults::MAX_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Terminal executions kept for lookups and diagnostics
    pub history_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            history_limit: defaults::HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: defaults::EVENT_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl EngineConfig {
    /// Validate settings that would otherwise fail at runtime
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.max_concurrent_actions == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.max_concurrent_actions",
                0,
                "concurrency limit must be greater than 0",
            ));
        }

        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.tick_interval_ms",
                0,
                "tick interval must be greater than 0",
            ));
        }

        if self.saga.action_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "saga.action_timeout_ms",
                0,
                "action timeout must be greater than 0",
            ));
        }

        if self.saga.step_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "saga.step_timeout_ms",
                0,
                "step timeout must be greater than 0",
            ));
        }

        if self.saga.step_timeout_ms > self.saga.action_timeout_ms {
            return Err(ConfigurationError::invalid_value(
                "saga.step_timeout_ms",
                self.saga.step_timeout_ms,
                "step timeout cannot exceed the action timeout",
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                self.retry.base_delay_ms,
                "base delay cannot exceed max_delay_ms",
            ));
        }

        if self.registry.history_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "registry.history_limit",
                0,
                "history limit must be greater than 0",
            ));
        }

        if self.events.buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.buffer_size",
                0,
                "event buffer must be greater than 0",
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigurationError::invalid_value(
                "logging.format",
                &self.logging.format,
                "expected 'pretty' or 'json'",
            ));
        }

        Ok(())
    }
}
