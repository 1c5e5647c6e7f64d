//! # Action Execution
//!
//! Live status record for one request. Exactly one `ActionExecution` exists per request id;
//! it survives retries (the retry count grows, the id stays) and is owned by the
//! [`ExecutionRegistry`](crate::registry::ExecutionRegistry).

use super::action_request::ActionRequest;
use super::action_result::ActionResult;
use crate::error::Result;
use crate::state_machine::{ExecutionEvent, ExecutionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecution {
    pub id: Uuid,
    pub request_id: Uuid,
    pub action_type: String,
    pub user_id: String,
    pub status: ExecutionStatus,
    /// First time the request entered `executing`
    pub start_time: Option<DateTime<Utc>>,
    /// Set when a terminal status is reached
    pub end_time: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub error_code: Option<String>,
    pub result: Option<ActionResult>,
    /// Set when a cancel arrived while the saga was executing
    pub cancel_requested: bool,
    /// A compensation step failed; external state may not have been restored
    pub compensation_incomplete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionExecution {
    pub fn queued(request: &ActionRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request_id: request.id,
            action_type: request.action_type.clone(),
            user_id: request.user_id.clone(),
            status: ExecutionStatus::Queued,
            start_time: None,
            end_time: None,
            retry_count: 0,
            last_error: None,
            error_code: None,
            result: None,
            cancel_requested: false,
            compensation_incomplete: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a state machine event and update the bookkeeping timestamps
    pub fn apply(&mut self, event: &ExecutionEvent) -> Result<ExecutionStatus> {
        let previous = self.status;
        let next = previous.transition(event)?;
        let now = Utc::now();

        match event {
            ExecutionEvent::Start if self.start_time.is_none() => self.start_time = Some(now),
            ExecutionEvent::Fail(reason) => self.last_error = Some(reason.clone()),
            ExecutionEvent::Cancel if previous.is_active() => self.cancel_requested = true,
            _ => {}
        }

        if next.is_terminal() {
            self.end_time = Some(now);
        }

        self.status = next;
        self.updated_at = now;
        Ok(next)
    }

    /// Wall-clock time between first start and terminal state
    pub fn duration_ms(&self) -> Option<u64> {
        let start = self.start_time?;
        let end = self.end_time?;
        Some((end - start).num_milliseconds().max(0) as u64)
    }
}
