//! Error types for the saga engine.
//!
//! Every failure an action can hit maps onto one [`ActionError`] variant. The variant decides
//! whether the retry coordinator may schedule another attempt ([`ActionError::is_retryable`])
//! and which stable code is stored on the execution record ([`ActionError::error_code`]).

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    /// Input rejected by the action handler before any step ran
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A step failed mid-saga; rollback was attempted
    #[error("Step {step_id} failed: {reason}")]
    StepFailure { step_id: String, reason: String },

    /// The saga or one of its steps exceeded its deadline
    #[error("Timeout during {operation} after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// No step handler is registered for a step's kind
    #[error("Unknown step kind {kind} for step {step_id}")]
    UnknownStepKind { step_id: String, kind: String },

    #[error("Unknown action type: {0}")]
    UnknownActionType(String),

    /// A compensation step failed. Logged and reported, never surfaced as the saga's outcome.
    #[error("Rollback step {step_id} failed: {reason}")]
    RollbackFailure { step_id: String, reason: String },

    /// Building the step list failed before anything was executed
    #[error("Step planning failed: {0}")]
    PlanningFailed(String),

    #[error("Action queue is full ({capacity} pending actions)")]
    QueueFull { capacity: usize },

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("State transition error: {0}")]
    StateTransitionError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Store error: {0}")]
    StoreError(String),
}

impl ActionError {
    /// Whether a saga that ended with this error may be re-submitted
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StepFailure { .. } | Self::Timeout { .. } | Self::PlanningFailed(_)
        )
    }

    /// Stable code recorded alongside the error message
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::StepFailure { .. } => "STEP_FAILURE",
            Self::Timeout { .. } => "EXECUTION_TIMEOUT",
            Self::UnknownStepKind { .. } => "UNKNOWN_STEP_KIND",
            Self::UnknownActionType(_) => "UNKNOWN_ACTION_TYPE",
            Self::RollbackFailure { .. } => "ROLLBACK_FAILURE",
            Self::PlanningFailed(_) => "PLANNING_FAILED",
            Self::QueueFull { .. } => "QUEUE_FULL",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::StateTransitionError(_) => "STATE_TRANSITION_ERROR",
            Self::ConfigurationError(_) => "CONFIGURATION_ERROR",
            Self::StoreError(_) => "STORE_ERROR",
        }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(error: serde_json::Error) -> Self {
        ActionError::StoreError(format!("JSON serialization error: {error}"))
    }
}

impl From<crate::config::ConfigurationError> for ActionError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        ActionError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ActionError>;
