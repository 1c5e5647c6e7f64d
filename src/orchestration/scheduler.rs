//! # Action Scheduler
//!
//! Public entry point of the engine. Accepts submissions, keeps them in the priority queue,
//! dispatches them to the saga runner within the concurrency limit and applies the outcome
//! of every attempt: complete, retry after a backoff delay, or fail.
//!
//! ## Concurrency model
//!
//! Queue contents, the set of executing request ids and the accepting flag live together
//! behind one lock, so admission and dispatch decisions see a consistent picture. The lock is
//! never held across an await; lifecycle events and history writes happen after it is
//! released. A saga's terminal status is recorded before its slot is released, so an
//! observer never sees a free slot while the previous occupant still looks `executing`.
//!
//! Dispatch passes run after every submission, after every finished attempt, when a retry
//! timer fires and on every tick of the background loop started by [`ActionScheduler::start`].
//! The tick is what picks up scheduled requests whose time has come.

use crate::config::EngineConfig;
use crate::error::{ActionError, Result};
use crate::events::{ActionEvent, ActionObserver, EventPublisher, EventSubject};
use crate::models::{ActionExecution, ActionRequest, ActionResult, StepKind, SubmitOptions};
use crate::orchestration::action_queue::ActionQueue;
use crate::orchestration::retry_coordinator::{RetryCoordinator, RetryDecision};
use crate::orchestration::saga_runner::{SagaOutcome, SagaRunner};
use crate::orchestration::step_executor::StepExecutor;
use crate::orchestration::types::{ActionContext, ActionHandler, StepHandler};
use crate::registry::{ActionHandlerRegistry, ExecutionMetrics, ExecutionRegistry};
use crate::state_machine::{ExecutionEvent, ExecutionStatus};
use crate::stores::{
    EphemeralStore, HistoryRecord, HistoryStore, InMemoryEphemeralStore, InMemoryHistoryStore,
};
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Engine-wide view combining registry statistics with scheduler occupancy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub executions: ExecutionMetrics,
    /// Requests waiting in the queue (excludes pending retries)
    pub queue_depth: usize,
    /// Sagas currently holding a slot
    pub executing: usize,
    pub available_slots: usize,
    /// Retries waiting for their backoff delay
    pub pending_retries: usize,
}

/// What [`ActionScheduler::shutdown`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Queued requests marked `cancelled`
    pub cancelled_queued: usize,
    /// Executions waiting on a retry timer, marked `failed`
    pub failed_retries: usize,
    /// Sagas still running when the grace period ran out
    pub abandoned_in_flight: usize,
}

#[derive(Debug)]
struct SchedulerState {
    queue: ActionQueue,
    executing: HashSet<Uuid>,
    accepting: bool,
}

struct SchedulerInner {
    config: EngineConfig,
    handlers: ActionHandlerRegistry,
    executions: ExecutionRegistry,
    runner: SagaRunner,
    retry: RetryCoordinator,
    history: Arc<dyn HistoryStore>,
    publisher: EventPublisher,
    state: Mutex<SchedulerState>,
    /// Woken whenever the last executing saga releases its slot
    idle: Notify,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; all clones drive the same engine
#[derive(Clone)]
pub struct ActionScheduler {
    inner: Arc<SchedulerInner>,
}

/// Assembles an [`ActionScheduler`]. Stores default to the in-memory implementations.
pub struct ActionSchedulerBuilder {
    config: EngineConfig,
    handlers: ActionHandlerRegistry,
    step_executor: StepExecutor,
    ephemeral: Option<Arc<dyn EphemeralStore>>,
    history: Option<Arc<dyn HistoryStore>>,
    publisher: Option<EventPublisher>,
}

impl ActionSchedulerBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            handlers: ActionHandlerRegistry::new(),
            step_executor: StepExecutor::new(),
            ephemeral: None,
            history: None,
            publisher: None,
        }
    }

    pub fn with_action_handler(self, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.register(handler);
        self
    }

    pub fn with_handler_registry(mut self, handlers: ActionHandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_step_handler(self, kind: StepKind, handler: Arc<dyn StepHandler>) -> Self {
        self.step_executor.register(kind, handler);
        self
    }

    pub fn with_step_executor(mut self, step_executor: StepExecutor) -> Self {
        self.step_executor = step_executor;
        self
    }

    pub fn with_ephemeral_store(mut self, store: Arc<dyn EphemeralStore>) -> Self {
        self.ephemeral = Some(store);
        self
    }

    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn with_event_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn build(self) -> Result<ActionScheduler> {
        self.config.validate()?;

        let executions = ExecutionRegistry::new(self.config.registry.history_limit);
        let ephemeral = self
            .ephemeral
            .unwrap_or_else(|| Arc::new(InMemoryEphemeralStore::new()));
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(InMemoryHistoryStore::new()));
        let publisher = self
            .publisher
            .unwrap_or_else(|| EventPublisher::new(self.config.events.buffer_size));

        let runner = SagaRunner::new(
            self.step_executor,
            executions.clone(),
            ephemeral,
            self.config.saga.clone(),
        );
        let retry = RetryCoordinator::new(self.config.retry.clone());
        let state = SchedulerState {
            queue: ActionQueue::new(self.config.scheduler.queue_capacity()),
            executing: HashSet::new(),
            accepting: true,
        };

        info!(
            max_concurrent_actions = self.config.scheduler.max_concurrent_actions,
            max_queue_size = self.config.scheduler.max_queue_size,
            action_types = ?self.handlers.action_types(),
            "Action scheduler created"
        );

        Ok(ActionScheduler {
            inner: Arc::new(SchedulerInner {
                config: self.config,
                handlers: self.handlers,
                executions,
                runner,
                retry,
                history,
                publisher,
                state: Mutex::new(state),
                idle: Notify::new(),
                tick_task: Mutex::new(None),
            }),
        })
    }
}

impl ActionScheduler {
    pub fn builder(config: EngineConfig) -> ActionSchedulerBuilder {
        ActionSchedulerBuilder::new(config)
    }

    /// Register or replace an action handler on a running scheduler
    pub fn register_action_handler(&self, handler: Arc<dyn ActionHandler>) {
        self.inner.handlers.register(handler);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Queue a new action and return its request id.
    ///
    /// Fails with `UnknownActionType` when no handler is registered, `QueueFull` when the
    /// queue is at capacity and `ShuttingDown` after [`shutdown`](Self::shutdown).
    #[instrument(skip(self, input, options), fields(user_id = %user_id, action_type = %action_type))]
    pub async fn submit(
        &self,
        user_id: &str,
        action_type: &str,
        input: Value,
        options: SubmitOptions,
    ) -> Result<Uuid> {
        self.inner.handlers.get(action_type)?;

        let request = Arc::new(ActionRequest::new(user_id, action_type, input, options));
        let execution = {
            let mut state = self.inner.state.lock();
            if !state.accepting {
                return Err(ActionError::ShuttingDown);
            }
            state.queue.push(request.clone())?;
            self.inner.executions.register(&request)
        };

        info!(
            request_id = %request.id,
            priority = %request.priority,
            "Action queued"
        );
        self.inner.publisher.publish(ActionEvent::Queued {
            subject: subject(&execution),
            priority: request.priority,
            queued_at: execution.created_at,
        });

        self.dispatch();
        Ok(request.id)
    }

    /// Cancel a request on behalf of `user_id`.
    ///
    /// Queued requests (including those waiting on a retry timer) are removed and marked
    /// `cancelled`. An executing saga is marked `cancelled` immediately but keeps running to
    /// the end of its current attempt and is never retried. Returns false when the request is
    /// unknown, owned by another user or already terminal.
    #[instrument(skip(self), fields(request_id = %request_id, user_id = %user_id))]
    pub async fn cancel(&self, request_id: Uuid, user_id: &str) -> bool {
        let Some(execution) = self.inner.executions.get(request_id) else {
            return false;
        };
        if execution.user_id != user_id {
            warn!(owner = %execution.user_id, "Cancel rejected, request belongs to another user");
            return false;
        }

        let cancelled = {
            let mut state = self.inner.state.lock();
            match self.inner.executions.status(request_id) {
                Some(ExecutionStatus::Queued) => {
                    state.queue.remove(request_id);
                    self.inner.retry.cancel(request_id);
                    self.inner
                        .executions
                        .apply(request_id, ExecutionEvent::Cancel)
                        .ok()
                        .map(|execution| (execution, false))
                }
                Some(status) if status.is_active() && state.executing.contains(&request_id) => self
                    .inner
                    .executions
                    .apply(request_id, ExecutionEvent::Cancel)
                    .ok()
                    .map(|execution| (execution, true)),
                _ => None,
            }
        };

        let Some((execution, while_executing)) = cancelled else {
            debug!("Cancel ignored, request is not cancellable");
            return false;
        };

        info!(while_executing, "Action cancelled");
        self.inner.publisher.publish(ActionEvent::Cancelled {
            subject: subject(&execution),
            while_executing,
        });
        if !while_executing {
            self.inner.record_history(&execution).await;
        }
        true
    }

    pub fn get_status(&self, request_id: Uuid) -> Option<ActionExecution> {
        self.inner.executions.get(request_id)
    }

    /// Executions of one user, newest first
    pub fn list_by_user(&self, user_id: &str) -> Vec<ActionExecution> {
        self.inner.executions.list_by_user(user_id)
    }

    pub fn recent_executions(&self, limit: usize) -> Vec<ActionExecution> {
        self.inner.executions.recent(limit)
    }

    pub fn metrics(&self) -> EngineMetrics {
        let (queue_depth, executing) = {
            let state = self.inner.state.lock();
            (state.queue.len(), state.executing.len())
        };
        let max = self.inner.config.scheduler.max_concurrent_actions;

        EngineMetrics {
            executions: self.inner.executions.metrics(),
            queue_depth,
            executing,
            available_slots: max.saturating_sub(executing),
            pending_retries: self.inner.retry.pending(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActionEvent> {
        self.inner.publisher.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn ActionObserver>) {
        self.inner.publisher.add_observer(observer);
    }

    /// Run one dispatch pass: expire stale requests and fill free slots
    pub fn tick(&self) {
        self.dispatch();
    }

    /// Start the periodic dispatch loop. Calling it again is a no-op.
    pub fn start(&self) {
        let mut tick_task = self.inner.tick_task.lock();
        if tick_task.is_some() {
            debug!("Scheduler tick loop already running");
            return;
        }

        let interval = self.inner.config.scheduler.tick_interval();
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        *tick_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ActionScheduler { inner }.dispatch();
            }
        }));

        info!(
            tick_interval_ms = interval.as_millis(),
            "🚀 SCHEDULER: Tick loop started"
        );
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.state.lock().accepting
    }

    /// Stop accepting work, cancel queued requests, fail pending retries and wait up to the
    /// grace period for executing sagas. Calling it again returns an empty summary.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> ShutdownSummary {
        let drained = {
            let mut state = self.inner.state.lock();
            if !state.accepting {
                return ShutdownSummary::default();
            }
            state.accepting = false;
            state.queue.drain()
        };

        info!(queued = drained.len(), "🛑 SCHEDULER: Shutting down");

        if let Some(handle) = self.inner.tick_task.lock().take() {
            handle.abort();
        }

        let mut summary = ShutdownSummary::default();

        for request in drained {
            match self
                .inner
                .executions
                .apply(request.id, ExecutionEvent::Cancel)
            {
                Ok(execution) => {
                    summary.cancelled_queued += 1;
                    self.inner.publisher.publish(ActionEvent::Cancelled {
                        subject: subject(&execution),
                        while_executing: false,
                    });
                    self.inner.record_history(&execution).await;
                }
                Err(e) => warn!(request_id = %request.id, error = %e, "Could not cancel queued request"),
            }
        }

        for request_id in self.inner.retry.shutdown() {
            match self
                .inner
                .executions
                .fail(request_id, &ActionError::ShuttingDown)
            {
                Ok(execution) => {
                    summary.failed_retries += 1;
                    self.inner.publish_failed(&execution);
                    self.inner.record_history(&execution).await;
                }
                Err(e) => warn!(request_id = %request_id, error = %e, "Could not fail pending retry"),
            }
        }

        let grace = self.inner.config.scheduler.shutdown_grace_period();
        let drained_in_time = tokio::time::timeout(grace, self.inner.wait_idle())
            .await
            .is_ok();
        if !drained_in_time {
            summary.abandoned_in_flight = self.inner.state.lock().executing.len();
            warn!(
                in_flight = summary.abandoned_in_flight,
                grace_period_ms = grace.as_millis(),
                "Shutdown grace period elapsed with sagas still executing"
            );
        }

        info!(
            cancelled_queued = summary.cancelled_queued,
            failed_retries = summary.failed_retries,
            abandoned_in_flight = summary.abandoned_in_flight,
            "✅ SCHEDULER: Shutdown complete"
        );
        summary
    }

    fn dispatch(&self) {
        let (expired, started) = {
            let mut state = self.inner.state.lock();
            if !state.accepting {
                return;
            }

            let free_slots = self
                .inner
                .config
                .scheduler
                .max_concurrent_actions
                .saturating_sub(state.executing.len());
            let selection = state.queue.take_ready(Utc::now(), free_slots);

            let expired: Vec<ActionExecution> = selection
                .expired
                .iter()
                .filter_map(|request| {
                    self.inner
                        .executions
                        .apply(request.id, ExecutionEvent::Expire)
                        .map_err(|e| warn!(request_id = %request.id, error = %e, "Could not expire request"))
                        .ok()
                })
                .collect();

            let mut started = Vec::with_capacity(selection.dispatched.len());
            for request in selection.dispatched {
                match self
                    .inner
                    .executions
                    .apply(request.id, ExecutionEvent::Start)
                {
                    Ok(execution) => {
                        state.executing.insert(request.id);
                        started.push((request, execution));
                    }
                    Err(e) => {
                        error!(request_id = %request.id, error = %e, "Could not start request")
                    }
                }
            }

            (expired, started)
        };

        for execution in expired {
            info!(request_id = %execution.request_id, "Action expired before dispatch");
            self.inner.publisher.publish(ActionEvent::Expired {
                subject: subject(&execution),
                expired_at: execution.end_time.unwrap_or_else(Utc::now),
            });
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.record_history(&execution).await });
        }

        for (request, execution) in started {
            self.inner.publisher.publish(ActionEvent::Started {
                subject: subject(&execution),
                attempt: execution.retry_count,
                started_at: Utc::now(),
            });
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.run(request, execution).await });
        }
    }

    async fn run(self, request: Arc<ActionRequest>, execution: ActionExecution) {
        let outcome = match self.inner.handlers.get(&request.action_type) {
            Ok(handler) => {
                let context = Arc::new(ActionContext::for_request(
                    &request,
                    execution.id,
                    execution.retry_count,
                ));
                let attempt = self
                    .inner
                    .runner
                    .execute(context, &request.input, handler);
                match AssertUnwindSafe(attempt).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(request_id = %request.id, "Action handler panicked");
                        unplanned_failure(ActionError::PlanningFailed(
                            "action handler panicked".to_string(),
                        ))
                    }
                }
            }
            // the handler was replaced by one with a different action type after submission
            Err(e) => unplanned_failure(e),
        };

        self.finish(request, outcome).await;
    }

    /// Apply the attempt's outcome, release the slot and run a dispatch pass
    async fn finish(&self, request: Arc<ActionRequest>, outcome: SagaOutcome) {
        let inner = &self.inner;
        let request_id = request.id;

        if let Err(e) = inner.executions.record_result(
            request_id,
            outcome.result.clone(),
            outcome.compensation_incomplete(),
        ) {
            warn!(request_id = %request_id, error = %e, "Could not record action result");
        }
        if outcome.compensation_incomplete() {
            warn!(request_id = %request_id, "Action finished with incomplete compensation");
        }

        // `cancel` checks status under the same lock, so it never lands mid-settle
        let (event, terminal) = {
            let mut state = inner.state.lock();
            let (event, terminal) = self.settle(&request, outcome, state.accepting);
            state.executing.remove(&request_id);
            inner.executions.release(request_id);
            if state.executing.is_empty() {
                inner.idle.notify_waiters();
            }
            (event, terminal)
        };

        if let Some(event) = event {
            inner.publisher.publish(event);
        }
        if let Some(execution) = terminal {
            if execution.status == ExecutionStatus::Failed {
                inner.publish_failed(&execution);
            }
            inner.record_history(&execution).await;
        }

        self.dispatch();
    }

    /// Turn the attempt's outcome into the next status. Returns the event to publish and the
    /// execution when it became terminal.
    fn settle(
        &self,
        request: &Arc<ActionRequest>,
        outcome: SagaOutcome,
        accepting: bool,
    ) -> (Option<ActionEvent>, Option<ActionExecution>) {
        let inner = &self.inner;
        let request_id = request.id;

        let Some(execution) = inner.executions.get(request_id) else {
            warn!(request_id = %request_id, "Execution evicted before its saga returned");
            return (None, None);
        };
        if execution.status == ExecutionStatus::Cancelled {
            debug!(request_id = %request_id, "Cancelled saga returned, result kept");
            return (None, Some(execution));
        }

        let Some(error) = outcome.error else {
            return match inner.executions.apply(request_id, ExecutionEvent::Complete) {
                Ok(execution) => {
                    info!(
                        request_id = %request_id,
                        transaction_id = outcome.result.transaction_id.as_deref(),
                        execution_time_ms = outcome.result.execution_time_ms,
                        "Action completed"
                    );
                    let event = ActionEvent::Completed {
                        subject: subject(&execution),
                        transaction_id: outcome.result.transaction_id.clone(),
                        execution_time_ms: outcome.result.execution_time_ms,
                    };
                    (Some(event), Some(execution))
                }
                Err(e) => {
                    error!(request_id = %request_id, error = %e, "Could not complete action");
                    (None, None)
                }
            };
        };

        let decision = if error.is_retryable() && accepting {
            inner.retry.evaluate(execution.retry_count)
        } else {
            RetryDecision::Exhausted {
                attempts: execution.retry_count,
            }
        };

        match decision {
            RetryDecision::Retry { attempt, delay } => {
                match inner.executions.schedule_retry(request_id, &error) {
                    Ok(execution) => {
                        info!(
                            request_id = %request_id,
                            attempt,
                            delay_ms = delay.as_millis(),
                            error = %error,
                            "Action failed, retry scheduled"
                        );
                        let scheduler = self.clone();
                        let retry_request = request.clone();
                        inner.retry.schedule(request_id, delay, async move {
                            scheduler.requeue(retry_request).await;
                        });
                        let event = ActionEvent::RetryScheduled {
                            subject: subject(&execution),
                            attempt,
                            delay,
                        };
                        (Some(event), None)
                    }
                    Err(e) => {
                        error!(request_id = %request_id, error = %e, "Could not schedule retry");
                        (None, None)
                    }
                }
            }
            RetryDecision::Exhausted { attempts } => match inner.executions.fail(request_id, &error) {
                Ok(execution) => {
                    warn!(
                        request_id = %request_id,
                        retries = attempts,
                        error = %error,
                        "Action failed"
                    );
                    (None, Some(execution))
                }
                Err(e) => {
                    error!(request_id = %request_id, error = %e, "Could not fail action");
                    (None, None)
                }
            },
        }
    }

    /// Put a request back in the queue once its retry delay elapsed
    async fn requeue(&self, request: Arc<ActionRequest>) {
        let (requeued, abandoned) = {
            let mut state = self.inner.state.lock();
            let still_queued =
                self.inner.executions.status(request.id) == Some(ExecutionStatus::Queued);
            if !still_queued {
                (false, None)
            } else if state.accepting {
                state.queue.push_retry(request.clone());
                (true, None)
            } else {
                // armed after shutdown drained the timers
                let abandoned = self
                    .inner
                    .executions
                    .fail(request.id, &ActionError::ShuttingDown)
                    .ok();
                (false, abandoned)
            }
        };

        if requeued {
            debug!(request_id = %request.id, "Retry re-queued");
            self.dispatch();
        } else if let Some(execution) = abandoned {
            self.inner.publish_failed(&execution);
            self.inner.record_history(&execution).await;
        } else {
            debug!(request_id = %request.id, "Retry dropped, request no longer queued");
        }
    }
}

impl SchedulerInner {
    fn publish_failed(&self, execution: &ActionExecution) {
        self.publisher.publish(ActionEvent::Failed {
            subject: subject(execution),
            error: execution.last_error.clone().unwrap_or_default(),
            error_code: execution.error_code.clone().unwrap_or_default(),
            retry_count: execution.retry_count,
        });
    }

    async fn record_history(&self, execution: &ActionExecution) {
        if let Err(e) = self.history.append(HistoryRecord::from(execution)).await {
            warn!(
                request_id = %execution.request_id,
                error = %e,
                "Failed to append execution history"
            );
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.state.lock().executing.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for ActionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ActionScheduler")
            .field("queue_depth", &state.queue.len())
            .field("executing", &state.executing.len())
            .field("accepting", &state.accepting)
            .finish()
    }
}

fn subject(execution: &ActionExecution) -> EventSubject {
    EventSubject {
        request_id: execution.request_id,
        user_id: execution.user_id.clone(),
        action_type: execution.action_type.clone(),
    }
}

fn unplanned_failure(error: ActionError) -> SagaOutcome {
    SagaOutcome {
        result: ActionResult::failed(error.to_string(), Vec::new(), 0),
        error: Some(error),
        rollback: None,
    }
}
