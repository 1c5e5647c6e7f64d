//! # Action Request
//!
//! The immutable unit of work accepted by the scheduler. A request is created once at
//! submission, shared as `Arc<ActionRequest>` between the queue, the saga runner and the
//! retry timers, and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Discrete dispatch tier for queued requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl ActionPriority {
    /// Numeric rank; higher dispatches first
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

impl PartialOrd for ActionPriority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActionPriority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for ActionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for ActionPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid action priority: {s}")),
        }
    }
}

/// Optional settings accepted by `submit`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitOptions {
    pub priority: ActionPriority,
    /// Do not dispatch before this instant
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Drop the request if it is still queued at this instant
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
}

impl SubmitOptions {
    pub fn with_priority(mut self, priority: ActionPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: Uuid,
    pub user_id: String,
    /// Key into the action handler registry
    pub action_type: String,
    /// Opaque payload handed to the action handler
    pub input: Value,
    pub priority: ActionPriority,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl ActionRequest {
    pub fn new(
        user_id: impl Into<String>,
        action_type: impl Into<String>,
        input: Value,
        options: SubmitOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            action_type: action_type.into(),
            input,
            priority: options.priority,
            scheduled_at: options.scheduled_at,
            expires_at: options.expires_at,
            metadata: options.metadata,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// False while `scheduled_at` is still in the future
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map_or(true, |scheduled_at| scheduled_at <= now)
    }

    /// Instant used to order requests of equal priority
    pub fn ready_at(&self) -> DateTime<Utc> {
        self.scheduled_at.unwrap_or(self.created_at)
    }
}
