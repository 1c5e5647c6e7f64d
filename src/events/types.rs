use crate::constants::events;
use crate::models::ActionPriority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Identity shared by every lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubject {
    pub request_id: Uuid,
    pub user_id: String,
    pub action_type: String,
}

/// Lifecycle notifications emitted after each execution state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ActionEvent {
    Queued {
        subject: EventSubject,
        priority: ActionPriority,
        queued_at: DateTime<Utc>,
    },
    Started {
        subject: EventSubject,
        attempt: u32,
        started_at: DateTime<Utc>,
    },
    Completed {
        subject: EventSubject,
        transaction_id: Option<String>,
        execution_time_ms: u64,
    },
    Failed {
        subject: EventSubject,
        error: String,
        error_code: String,
        retry_count: u32,
    },
    RetryScheduled {
        subject: EventSubject,
        attempt: u32,
        delay: Duration,
    },
    Cancelled {
        subject: EventSubject,
        /// True when the saga was already executing and only flagged
        while_executing: bool,
    },
    Expired {
        subject: EventSubject,
        expired_at: DateTime<Utc>,
    },
}

impl ActionEvent {
    pub fn subject(&self) -> &EventSubject {
        match self {
            Self::Queued { subject, .. }
            | Self::Started { subject, .. }
            | Self::Completed { subject, .. }
            | Self::Failed { subject, .. }
            | Self::RetryScheduled { subject, .. }
            | Self::Cancelled { subject, .. }
            | Self::Expired { subject, .. } => subject,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.subject().request_id
    }

    /// Dotted event name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued { .. } => events::ACTION_QUEUED,
            Self::Started { .. } => events::ACTION_STARTED,
            Self::Completed { .. } => events::ACTION_COMPLETED,
            Self::Failed { .. } => events::ACTION_FAILED,
            Self::RetryScheduled { .. } => events::ACTION_RETRY_SCHEDULED,
            Self::Cancelled { .. } => events::ACTION_CANCELLED,
            Self::Expired { .. } => events::ACTION_EXPIRED,
        }
    }
}
