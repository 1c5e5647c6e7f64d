//! # Execution Registry
//!
//! Owns the live [`ActionExecution`] of every request and a bounded window of terminal ones.
//! All status changes go through [`ExecutionRegistry::apply`], which runs the state machine,
//! so an invalid transition can never be recorded.
//!
//! Outcome counters are accumulated when an execution turns terminal and are therefore not
//! affected by evicting old executions from the lookup window.
//!
//! A started execution is in flight until [`ExecutionRegistry::release`] is called for it.
//! In-flight executions never enter the retention window, so a saga cancelled while running
//! stays visible until its attempt returns.

use crate::error::{ActionError, Result};
use crate::models::{ActionExecution, ActionRequest, ActionResult};
use crate::state_machine::{ExecutionEvent, ExecutionStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Aggregate outcome statistics, globally or for one action type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMetrics {
    /// Finished sagas: completed + failed
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cancelled_executions: u64,
    pub expired_executions: u64,
    /// Mean first-start to terminal time of finished sagas
    pub average_duration_ms: f64,
    /// successful / total, 0.0 when nothing finished yet
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default)]
struct OutcomeAccumulator {
    completed: u64,
    failed: u64,
    cancelled: u64,
    expired: u64,
    timed_executions: u64,
    total_duration_ms: u64,
}

impl OutcomeAccumulator {
    fn record(&mut self, execution: &ActionExecution) {
        match execution.status {
            ExecutionStatus::Completed => self.completed += 1,
            ExecutionStatus::Failed => self.failed += 1,
            ExecutionStatus::Cancelled => self.cancelled += 1,
            ExecutionStatus::Expired => self.expired += 1,
            _ => return,
        }

        if matches!(
            execution.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed
        ) {
            if let Some(duration_ms) = execution.duration_ms() {
                self.timed_executions += 1;
                self.total_duration_ms += duration_ms;
            }
        }
    }

    fn snapshot(&self) -> OutcomeMetrics {
        let total = self.completed + self.failed;
        OutcomeMetrics {
            total_executions: total,
            successful_executions: self.completed,
            failed_executions: self.failed,
            cancelled_executions: self.cancelled,
            expired_executions: self.expired,
            average_duration_ms: if self.timed_executions > 0 {
                self.total_duration_ms as f64 / self.timed_executions as f64
            } else {
                0.0
            },
            success_rate: if total > 0 {
                self.completed as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Point-in-time registry view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub overall: OutcomeMetrics,
    pub by_action_type: HashMap<String, OutcomeMetrics>,
    /// Executions currently `executing` or `rolled_back`
    pub active_executions: usize,
    /// Executions waiting in the queue or on a retry timer
    pub queued_executions: usize,
}

#[derive(Debug, Default)]
struct OutcomeStats {
    overall: OutcomeAccumulator,
    by_action_type: HashMap<String, OutcomeAccumulator>,
}

#[derive(Debug, Default)]
struct RetentionWindow {
    /// Request ids of terminal executions, oldest first
    finished: VecDeque<Uuid>,
    /// Started and not yet released
    in_flight: HashSet<Uuid>,
}

impl RetentionWindow {
    /// Returns the ids pushed out of the window
    fn retain(&mut self, request_id: Uuid, limit: usize) -> Vec<Uuid> {
        if self.in_flight.contains(&request_id) {
            return Vec::new();
        }
        self.finished.push_back(request_id);
        let overflow = self.finished.len().saturating_sub(limit);
        self.finished.drain(..overflow).collect()
    }
}

#[derive(Debug)]
struct RegistryInner {
    executions: DashMap<Uuid, ActionExecution>,
    window: Mutex<RetentionWindow>,
    stats: Mutex<OutcomeStats>,
    history_limit: usize,
}

#[derive(Debug, Clone)]
pub struct ExecutionRegistry {
    inner: Arc<RegistryInner>,
}

impl ExecutionRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                executions: DashMap::new(),
                window: Mutex::new(RetentionWindow::default()),
                stats: Mutex::new(OutcomeStats::default()),
                history_limit: history_limit.max(1),
            }),
        }
    }

    /// Create the `queued` execution for a freshly submitted request
    pub fn register(&self, request: &ActionRequest) -> ActionExecution {
        let execution = ActionExecution::queued(request);
        self.inner
            .executions
            .insert(request.id, execution.clone());
        execution
    }

    /// Run `event` through the state machine for `request_id`
    pub fn apply(&self, request_id: Uuid, event: ExecutionEvent) -> Result<ActionExecution> {
        self.update(request_id, event, |_| {})
    }

    /// Terminal failure, recording the error code
    pub fn fail(&self, request_id: Uuid, error: &ActionError) -> Result<ActionExecution> {
        let code = error.error_code().to_string();
        self.update(request_id, ExecutionEvent::Fail(error.to_string()), |execution| {
            execution.error_code = Some(code);
        })
    }

    /// Move a failed attempt back to `queued` and bump its retry count.
    /// Returns the updated execution.
    pub fn schedule_retry(&self, request_id: Uuid, error: &ActionError) -> Result<ActionExecution> {
        let message = error.to_string();
        let code = error.error_code().to_string();
        self.update(request_id, ExecutionEvent::Retry, |execution| {
            execution.retry_count += 1;
            execution.last_error = Some(message);
            execution.error_code = Some(code);
        })
    }

    /// Attach the latest attempt's result. Allowed in any state, including a cancel that
    /// arrived while the saga was running.
    pub fn record_result(
        &self,
        request_id: Uuid,
        result: ActionResult,
        compensation_incomplete: bool,
    ) -> Result<()> {
        let mut execution = self
            .inner
            .executions
            .get_mut(&request_id)
            .ok_or_else(|| not_found(request_id))?;
        execution.compensation_incomplete |= compensation_incomplete;
        execution.result = Some(result);
        execution.updated_at = chrono::Utc::now();
        Ok(())
    }

    pub fn get(&self, request_id: Uuid) -> Option<ActionExecution> {
        self.inner
            .executions
            .get(&request_id)
            .map(|entry| entry.value().clone())
    }

    pub fn status(&self, request_id: Uuid) -> Option<ExecutionStatus> {
        self.inner
            .executions
            .get(&request_id)
            .map(|entry| entry.status)
    }

    /// Executions of one user, newest first
    pub fn list_by_user(&self, user_id: &str) -> Vec<ActionExecution> {
        let mut executions: Vec<ActionExecution> = self
            .inner
            .executions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        executions
    }

    /// Most recently updated executions, newest first
    pub fn recent(&self, limit: usize) -> Vec<ActionExecution> {
        let mut executions: Vec<ActionExecution> = self
            .inner
            .executions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        executions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        executions.truncate(limit);
        executions
    }

    pub fn count_by_status(&self, status: ExecutionStatus) -> usize {
        self.inner
            .executions
            .iter()
            .filter(|entry| entry.status == status)
            .count()
    }

    pub fn metrics(&self) -> ExecutionMetrics {
        let (active, queued) =
            self.inner
                .executions
                .iter()
                .fold((0, 0), |(active, queued), entry| match entry.status {
                    s if s.is_active() => (active + 1, queued),
                    ExecutionStatus::Queued => (active, queued + 1),
                    _ => (active, queued),
                });

        let stats = self.inner.stats.lock();
        ExecutionMetrics {
            overall: stats.overall.snapshot(),
            by_action_type: stats
                .by_action_type
                .iter()
                .map(|(action_type, acc)| (action_type.clone(), acc.snapshot()))
                .collect(),
            active_executions: active,
            queued_executions: queued,
        }
    }

    /// End of a dispatched attempt. An execution that turned terminal while in flight
    /// (an advisory cancel, or the attempt's own outcome) enters the retention window now.
    pub fn release(&self, request_id: Uuid) {
        let evicted = {
            let execution = self.inner.executions.get(&request_id);
            let mut window = self.inner.window.lock();
            let was_in_flight = window.in_flight.remove(&request_id);
            match execution {
                Some(execution) if was_in_flight && execution.status.is_terminal() => {
                    window.retain(request_id, self.inner.history_limit)
                }
                _ => Vec::new(),
            }
        };
        self.evict(evicted);
    }

    pub fn is_in_flight(&self, request_id: Uuid) -> bool {
        self.inner.window.lock().in_flight.contains(&request_id)
    }

    pub fn len(&self) -> usize {
        self.inner.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.executions.is_empty()
    }

    fn update<F>(&self, request_id: Uuid, event: ExecutionEvent, mutate: F) -> Result<ActionExecution>
    where
        F: FnOnce(&mut ActionExecution),
    {
        // window placement changes under the entry guard, in step with `release`
        let (snapshot, evicted) = {
            let mut execution = self
                .inner
                .executions
                .get_mut(&request_id)
                .ok_or_else(|| not_found(request_id))?;
            let previous = execution.status;
            execution.apply(&event)?;
            mutate(&mut *execution);

            debug!(
                request_id = %request_id,
                event = event.event_type(),
                from = %previous,
                to = %execution.status,
                "Execution transitioned"
            );

            let mut window = self.inner.window.lock();
            if matches!(event, ExecutionEvent::Start) {
                window.in_flight.insert(request_id);
            }
            let evicted = if execution.status.is_terminal() {
                window.retain(request_id, self.inner.history_limit)
            } else {
                Vec::new()
            };
            (execution.value().clone(), evicted)
        };

        if snapshot.status.is_terminal() {
            self.record_outcome(&snapshot);
        }
        self.evict(evicted);

        Ok(snapshot)
    }

    fn record_outcome(&self, execution: &ActionExecution) {
        let mut stats = self.inner.stats.lock();
        stats.overall.record(execution);
        stats
            .by_action_type
            .entry(execution.action_type.clone())
            .or_default()
            .record(execution);
    }

    fn evict(&self, request_ids: Vec<Uuid>) {
        for request_id in request_ids {
            self.inner.executions.remove(&request_id);
        }
    }
}

fn not_found(request_id: Uuid) -> ActionError {
    ActionError::StateTransitionError(format!("no execution registered for request {request_id}"))
}
