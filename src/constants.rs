//! # System Constants
//!
//! Event names, store key prefixes and the compiled-in defaults that
//! [`EngineConfig`](crate::config::EngineConfig) falls back to.

/// Lifecycle event names published for every action
pub mod events {
    pub const ACTION_QUEUED: &str = "action.queued";
    pub const ACTION_STARTED: &str = "action.started";
    pub const ACTION_COMPLETED: &str = "action.completed";
    pub const ACTION_FAILED: &str = "action.failed";
    pub const ACTION_RETRY_SCHEDULED: &str = "action.retry_scheduled";
    pub const ACTION_CANCELLED: &str = "action.cancelled";
    pub const ACTION_EXPIRED: &str = "action.expired";
}

/// Key prefix for execution snapshots in the ephemeral store
pub const SNAPSHOT_KEY_PREFIX: &str = "action_execution";

/// Environment variable prefix for configuration overrides (`SAGA__SCHEDULER__MAX_CONCURRENT_ACTIONS=8`)
pub const CONFIG_ENV_PREFIX: &str = "SAGA";

pub mod defaults {
    pub const MAX_CONCURRENT_ACTIONS: usize = 5;
    pub const TICK_INTERVAL_MS: u64 = 1_000;
    pub const MAX_QUEUE_SIZE: usize = 1_000;
    pub const SHUTDOWN_GRACE_PERIOD_MS: u64 = 30_000;

    pub const ACTION_TIMEOUT_MS: u64 = 300_000; // 5 minutes
    pub const STEP_TIMEOUT_MS: u64 = 60_000;
    pub const SNAPSHOT_TTL_SECONDS: u64 = 3_600;

    pub const MAX_RETRY_ATTEMPTS: u32 = 3;
    pub const BASE_DELAY_MS: u64 = 5_000;
    pub const MAX_DELAY_MS: u64 = 300_000;

    pub const HISTORY_LIMIT: usize = 1_000;
    pub const EVENT_BUFFER_SIZE: usize = 1_024;
}

/// Build the ephemeral store key for an execution snapshot
pub fn snapshot_key(request_id: &uuid::Uuid) -> String {
    format!("{SNAPSHOT_KEY_PREFIX}:{request_id}")
}
