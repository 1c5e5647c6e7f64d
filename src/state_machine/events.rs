use serde::{Deserialize, Serialize};

/// Events that can trigger execution state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ExecutionEvent {
    /// Admitted through the concurrency gate
    Start,
    /// A step failed and compensation is starting
    RollBack,
    /// All steps succeeded
    Complete,
    /// Terminal failure with error message
    Fail(String),
    /// Re-queue for another attempt
    Retry,
    Cancel,
    /// Expiry passed before dispatch
    Expire,
}

impl ExecutionEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::RollBack => "roll_back",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Retry => "retry",
            Self::Cancel => "cancel",
            Self::Expire => "expire",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }
}
