//! # Saga Runner
//!
//! Runs one attempt of an action as a saga: validate the input, plan forward and rollback
//! steps, execute the forward steps strictly in order and, when one fails, compensate the
//! completed steps in reverse.
//!
//! The runner never touches the queue or the retry timer. It reports what happened through
//! [`SagaOutcome`] and leaves status decisions (complete, retry, fail) to the scheduler. The
//! only transition it applies itself is `executing -> rolled_back` when compensation starts.
//!
//! ## Deadlines
//!
//! The whole attempt is bounded by the action timeout. Each step gets the smaller of the step
//! timeout and whatever is left of that budget. Rollback steps and `process_result` are
//! bounded by the step timeout only, so compensation still runs after the saga deadline.
//!
//! ## Compensation
//!
//! Every rollback step must be named by exactly the forward steps it compensates, and every
//! rollback id a forward step names must be built. A plan that breaks either rule fails with
//! `PlanningFailed` before any step runs.

use crate::config::SagaConfig;
use crate::constants::snapshot_key;
use crate::error::ActionError;
use crate::models::{ActionResult, RollbackStep, Step, StepResult};
use crate::orchestration::step_executor::StepExecutor;
use crate::orchestration::types::{ActionContext, ActionHandler};
use crate::registry::ExecutionRegistry;
use crate::state_machine::ExecutionEvent;
use crate::stores::EphemeralStore;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// What compensation did after a failed attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackReport {
    /// Rollback step ids in the order they were run
    pub attempted: Vec<String>,
    /// One `RollbackFailure` per rollback step that did not succeed
    pub failures: Vec<ActionError>,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of one saga attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SagaOutcome {
    pub result: ActionResult,
    /// `None` exactly when `result.success`
    pub error: Option<ActionError>,
    /// Present when forward steps were attempted and one failed
    pub rollback: Option<RollbackReport>,
}

impl SagaOutcome {
    pub fn compensation_incomplete(&self) -> bool {
        self.rollback
            .as_ref()
            .is_some_and(|report| !report.is_complete())
    }
}

/// Progress record kept in the ephemeral store while an attempt runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaSnapshot {
    pub request_id: Uuid,
    pub execution_id: Uuid,
    pub user_id: String,
    pub action_type: String,
    pub attempt: u32,
    pub phase: SagaPhase,
    pub steps: Vec<StepResult>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaPhase {
    Executing,
    RollingBack,
    Completed,
    Failed,
}

#[derive(Clone)]
pub struct SagaRunner {
    step_executor: StepExecutor,
    executions: ExecutionRegistry,
    snapshots: Arc<dyn EphemeralStore>,
    config: SagaConfig,
}

impl std::fmt::Debug for SagaRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaRunner")
            .field("step_executor", &self.step_executor)
            .field("config", &self.config)
            .finish()
    }
}

impl SagaRunner {
    pub fn new(
        step_executor: StepExecutor,
        executions: ExecutionRegistry,
        snapshots: Arc<dyn EphemeralStore>,
        config: SagaConfig,
    ) -> Self {
        Self {
            step_executor,
            executions,
            snapshots,
            config,
        }
    }

    pub fn step_executor(&self) -> &StepExecutor {
        &self.step_executor
    }

    /// Run one attempt. The execution must already be `executing`.
    #[instrument(
        skip(self, input, handler),
        fields(
            request_id = %context.request_id,
            action_type = %context.action_type,
            attempt = context.attempt
        )
    )]
    pub async fn execute(
        &self,
        context: Arc<ActionContext>,
        input: &Value,
        handler: Arc<dyn ActionHandler>,
    ) -> SagaOutcome {
        let started = Instant::now();
        let deadline = started + self.config.action_timeout();

        let rejection = match self
            .within_deadline(deadline, handler.validate_input(&context, input))
            .await
        {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some(ActionError::ValidationError(
                "input rejected by handler".to_string(),
            )),
            Ok(Err(e)) => Some(ActionError::ValidationError(format!("{e:#}"))),
            Err(timeout_error) => Some(timeout_error),
        };
        if let Some(error) = rejection {
            return self
                .rejected(handler.as_ref(), &context, error, started)
                .await;
        }

        let plan = match self.plan(&context, input, handler.as_ref(), deadline).await {
            Ok(plan) => plan,
            Err(error) => {
                warn!(error = %error, "Saga planning failed");
                let result = ActionResult::failed(error.to_string(), Vec::new(), elapsed_ms(started));
                self.process_result(handler.as_ref(), &context, &result).await;
                self.persist_snapshot(&context, SagaPhase::Failed, &[]).await;
                return SagaOutcome {
                    result,
                    error: Some(error),
                    rollback: None,
                };
            }
        };
        let (steps, rollback_steps) = plan;

        debug!(
            steps = steps.len(),
            rollback_steps = rollback_steps.len(),
            "Saga planned"
        );
        self.persist_snapshot(&context, SagaPhase::Executing, &[])
            .await;

        let mut results: Vec<StepResult> = Vec::with_capacity(steps.len());
        let mut failure: Option<ActionError> = None;

        for step in &steps {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let error = self.saga_timeout(&context);
                results.push(StepResult::failed(
                    step.id.clone(),
                    error.to_string(),
                    Duration::ZERO,
                ));
                failure = Some(error);
                break;
            }

            let budget = remaining.min(self.config.step_timeout());
            let outcome = self
                .step_executor
                .execute(context.clone(), step.clone(), budget)
                .await;
            results.push(outcome.result);
            self.persist_snapshot(&context, SagaPhase::Executing, &results)
                .await;

            if let Some(error) = outcome.error {
                failure = Some(match error {
                    ActionError::Timeout { .. } if Instant::now() >= deadline => {
                        self.saga_timeout(&context)
                    }
                    other => other,
                });
                break;
            }
        }

        let (result, error, rollback) = match failure {
            None => {
                info!(steps = results.len(), "Saga completed");
                let result = ActionResult::completed(results, elapsed_ms(started));
                (result, None, None)
            }
            Some(error) => {
                warn!(error = %error, "Saga failed, compensating completed steps");
                self.persist_snapshot(&context, SagaPhase::RollingBack, &results)
                    .await;
                let report = self
                    .roll_back(&context, &steps, &rollback_steps, &results)
                    .await;
                let result =
                    ActionResult::failed(error.to_string(), results, elapsed_ms(started));
                (result, Some(error), Some(report))
            }
        };

        self.process_result(handler.as_ref(), &context, &result)
            .await;

        let phase = if result.success {
            SagaPhase::Completed
        } else {
            SagaPhase::Failed
        };
        self.persist_snapshot(&context, phase, &result.steps).await;

        SagaOutcome {
            result,
            error,
            rollback,
        }
    }

    /// Build forward and rollback steps and check every kind can be dispatched
    async fn plan(
        &self,
        context: &ActionContext,
        input: &Value,
        handler: &dyn ActionHandler,
        deadline: Instant,
    ) -> Result<(Vec<Step>, Vec<RollbackStep>), ActionError> {
        let steps = self
            .within_deadline(deadline, handler.build_steps(context, input))
            .await?
            .map_err(|e| ActionError::PlanningFailed(format!("building steps: {e:#}")))?;

        let rollback_steps = self
            .within_deadline(deadline, handler.build_rollback_steps(context, input))
            .await?
            .map_err(|e| ActionError::PlanningFailed(format!("building rollback steps: {e:#}")))?;

        let declared: HashSet<&str> = rollback_steps.iter().map(|r| r.id.as_str()).collect();
        for step in &steps {
            if let Some(rollback_id) = step.rollback.as_deref() {
                if !declared.contains(rollback_id) {
                    return Err(ActionError::PlanningFailed(format!(
                        "step {} is compensated by unknown rollback step {rollback_id}",
                        step.id
                    )));
                }
            }
        }
        let referenced: HashSet<&str> = steps.iter().filter_map(|s| s.rollback.as_deref()).collect();
        if let Some(orphan) = rollback_steps
            .iter()
            .find(|rollback| !referenced.contains(rollback.id.as_str()))
        {
            return Err(ActionError::PlanningFailed(format!(
                "rollback step {} does not compensate any step",
                orphan.id
            )));
        }

        for step in &steps {
            if !self.step_executor.has_handler(step.kind) {
                return Err(ActionError::UnknownStepKind {
                    step_id: step.id.clone(),
                    kind: step.kind.to_string(),
                });
            }
        }
        for rollback in &rollback_steps {
            if rollback.compensation.is_none() && !self.step_executor.has_handler(rollback.kind) {
                return Err(ActionError::UnknownStepKind {
                    step_id: rollback.id.clone(),
                    kind: rollback.kind.to_string(),
                });
            }
        }

        Ok((steps, rollback_steps))
    }

    /// Compensate completed steps, last declared rollback step first
    async fn roll_back(
        &self,
        context: &Arc<ActionContext>,
        steps: &[Step],
        rollback_steps: &[RollbackStep],
        results: &[StepResult],
    ) -> RollbackReport {
        if let Err(e) = self
            .executions
            .apply(context.request_id, ExecutionEvent::RollBack)
        {
            // a cancel that arrived mid-run already made the status terminal
            debug!(error = %e, "Rollback transition not applied");
        }

        let completed: HashMap<&str, &StepResult> = results
            .iter()
            .filter(|result| result.success)
            .map(|result| (result.step_id.as_str(), result))
            .collect();

        // rollback step id -> result of the forward step it compensates
        let compensable: HashMap<&str, &StepResult> = steps
            .iter()
            .filter_map(|step| {
                let rollback_id = step.rollback.as_deref()?;
                let original = completed.get(step.id.as_str())?;
                Some((rollback_id, *original))
            })
            .collect();

        let mut report = RollbackReport::default();
        let step_timeout = self.config.step_timeout();

        for rollback in rollback_steps.iter().rev() {
            let Some(original) = compensable.get(rollback.id.as_str()) else {
                continue;
            };
            report.attempted.push(rollback.id.clone());

            let outcome = match &rollback.compensation {
                Some(hook) => {
                    let call = AssertUnwindSafe(hook.compensate(context, rollback, original))
                        .catch_unwind();
                    match timeout(step_timeout, call).await {
                        Ok(Ok(Ok(()))) => Ok(()),
                        Ok(Ok(Err(e))) => Err(format!("{e:#}")),
                        Ok(Err(_)) => Err("compensation hook panicked".to_string()),
                        Err(_) => Err(format!(
                            "compensation hook timed out after {}ms",
                            step_timeout.as_millis()
                        )),
                    }
                }
                None => {
                    let outcome = self
                        .step_executor
                        .execute(context.clone(), rollback.as_step(), step_timeout)
                        .await;
                    match outcome.error {
                        None => Ok(()),
                        Some(error) => Err(error.to_string()),
                    }
                }
            };

            match outcome {
                Ok(()) => info!(
                    rollback_step = %rollback.id,
                    compensated_step = %original.step_id,
                    "Rollback step completed"
                ),
                Err(reason) => {
                    error!(
                        rollback_step = %rollback.id,
                        compensated_step = %original.step_id,
                        reason = %reason,
                        "Rollback step failed, continuing with remaining compensation"
                    );
                    report.failures.push(ActionError::RollbackFailure {
                        step_id: rollback.id.clone(),
                        reason,
                    });
                }
            }
        }

        if !report.is_complete() {
            warn!(
                failed_rollbacks = report.failures.len(),
                "Compensation incomplete, ledger state may need manual reconciliation"
            );
        }

        report
    }

    /// Errors, panics and timeouts here are logged only
    async fn process_result(
        &self,
        handler: &dyn ActionHandler,
        context: &ActionContext,
        result: &ActionResult,
    ) {
        let call = AssertUnwindSafe(handler.process_result(context, result)).catch_unwind();
        match timeout(self.config.step_timeout(), call).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %format!("{e:#}"), "process_result failed"),
            Ok(Err(_)) => error!("process_result panicked"),
            Err(_) => warn!(
                timeout_ms = self.config.step_timeout().as_millis(),
                "process_result timed out"
            ),
        }
    }

    async fn persist_snapshot(
        &self,
        context: &ActionContext,
        phase: SagaPhase,
        steps: &[StepResult],
    ) {
        let snapshot = SagaSnapshot {
            request_id: context.request_id,
            execution_id: context.execution_id,
            user_id: context.user_id.clone(),
            action_type: context.action_type.clone(),
            attempt: context.attempt,
            phase,
            steps: steps.to_vec(),
            updated_at: Utc::now(),
        };

        let value = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to serialize saga snapshot");
                return;
            }
        };

        if let Err(e) = self
            .snapshots
            .set(
                &snapshot_key(&context.request_id),
                value,
                self.config.snapshot_ttl(),
            )
            .await
        {
            warn!(error = %e, "Failed to persist saga snapshot");
        }
    }

    async fn within_deadline<F, T>(&self, deadline: Instant, future: F) -> Result<T, ActionError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| ActionError::Timeout {
                operation: "saga planning".to_string(),
                timeout: self.config.action_timeout(),
            })
    }

    fn saga_timeout(&self, context: &ActionContext) -> ActionError {
        ActionError::Timeout {
            operation: format!("action {}", context.action_type),
            timeout: self.config.action_timeout(),
        }
    }

    /// Validation refused the input or did not answer in time; no step ran
    async fn rejected(
        &self,
        handler: &dyn ActionHandler,
        context: &ActionContext,
        error: ActionError,
        started: Instant,
    ) -> SagaOutcome {
        match &error {
            ActionError::Timeout { .. } => warn!(error = %error, "Input validation timed out"),
            _ => warn!(error = %error, "Action input failed validation"),
        }
        let result = ActionResult::failed(error.to_string(), Vec::new(), elapsed_ms(started));
        self.process_result(handler, context, &result).await;
        SagaOutcome {
            result,
            error: Some(error),
            rollback: None,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
