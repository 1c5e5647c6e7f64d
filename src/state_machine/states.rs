use super::events::ExecutionEvent;
use crate::error::{ActionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Action execution states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Waiting in the queue or on a retry timer
    #[default]
    Queued,
    /// Steps are being executed
    Executing,
    /// Compensation is running; collapses into `Failed` or back into `Queued` for a retry
    RolledBack,
    /// All steps succeeded
    Completed,
    /// Failed with no retries left
    Failed,
    /// Cancelled by its owner
    Cancelled,
    /// Still queued when its expiry passed
    Expired,
}

impl ExecutionStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Check if a saga is currently running for this execution
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Executing | Self::RolledBack)
    }

    /// Resolve the next state for `event`, rejecting transitions the machine does not allow
    pub fn transition(&self, event: &ExecutionEvent) -> Result<ExecutionStatus> {
        use ExecutionEvent as E;

        let next = match (self, event) {
            (Self::Queued, E::Start) => Self::Executing,
            (Self::Queued, E::Cancel) => Self::Cancelled,
            (Self::Queued, E::Expire) => Self::Expired,
            // a retry that will never run (shutdown aborted its timer)
            (Self::Queued, E::Fail(_)) => Self::Failed,

            (Self::Executing, E::Complete) => Self::Completed,
            (Self::Executing, E::RollBack) => Self::RolledBack,
            (Self::Executing | Self::RolledBack, E::Fail(_)) => Self::Failed,
            (Self::Executing | Self::RolledBack, E::Retry) => Self::Queued,
            (Self::Executing | Self::RolledBack, E::Cancel) => Self::Cancelled,

            (state, event) => {
                return Err(ActionError::StateTransitionError(format!(
                    "cannot apply '{}' to an execution in state '{state}'",
                    event.event_type()
                )))
            }
        };

        Ok(next)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Executing => write!(f, "executing"),
            Self::RolledBack => write!(f, "rolled_back"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "executing" => Ok(Self::Executing),
            "rolled_back" => Ok(Self::RolledBack),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = ExecutionStatus::Queued;
        let state = state.transition(&ExecutionEvent::Start).unwrap();
        assert_eq!(state, ExecutionStatus::Executing);
        let state = state.transition(&ExecutionEvent::Complete).unwrap();
        assert_eq!(state, ExecutionStatus::Completed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_rollback_collapses_into_failed() {
        let state = ExecutionStatus::Executing
            .transition(&ExecutionEvent::RollBack)
            .unwrap();
        assert_eq!(state, ExecutionStatus::RolledBack);
        assert!(!state.is_terminal());

        let state = state
            .transition(&ExecutionEvent::Fail("buy failed".to_string()))
            .unwrap();
        assert_eq!(state, ExecutionStatus::Failed);
    }

    #[test]
    fn test_retry_returns_to_queued() {
        let state = ExecutionStatus::RolledBack
            .transition(&ExecutionEvent::Retry)
            .unwrap();
        assert_eq!(state, ExecutionStatus::Queued);
    }

    #[test]
    fn test_queued_exits() {
        assert_eq!(
            ExecutionStatus::Queued.transition(&ExecutionEvent::Cancel),
            Ok(ExecutionStatus::Cancelled)
        );
        assert_eq!(
            ExecutionStatus::Queued.transition(&ExecutionEvent::Expire),
            Ok(ExecutionStatus::Expired)
        );
        assert_eq!(
            ExecutionStatus::Queued.transition(&ExecutionEvent::Fail("shutdown".to_string())),
            Ok(ExecutionStatus::Failed)
        );
        assert!(ExecutionStatus::Queued
            .transition(&ExecutionEvent::Complete)
            .is_err());
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for state in [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
            ExecutionStatus::Expired,
        ] {
            for event in [
                ExecutionEvent::Start,
                ExecutionEvent::Complete,
                ExecutionEvent::Retry,
                ExecutionEvent::Cancel,
                ExecutionEvent::Expire,
            ] {
                assert!(state.transition(&event).is_err(), "{state} accepted {event:?}");
            }
        }
    }

    #[test]
    fn test_executing_cannot_expire() {
        assert!(ExecutionStatus::Executing
            .transition(&ExecutionEvent::Expire)
            .is_err());
    }

    #[test]
    fn test_string_round_trip() {
        assert_eq!("rolled_back".parse(), Ok(ExecutionStatus::RolledBack));
        assert_eq!(ExecutionStatus::Expired.to_string(), "expired");
    }
}
