//! # Step Executor
//!
//! Dispatches one saga step to the [`StepHandler`] registered for its kind and times it.
//!
//! Each step runs on its own task raced against a deadline. When the deadline wins the task
//! is detached rather than aborted: a ledger transaction that was already submitted keeps
//! going, and the saga treats the step as failed. Handler panics are reported as step
//! failures.

use crate::error::ActionError;
use crate::models::{Step, StepKind, StepResult};
use crate::orchestration::types::{ActionContext, StepHandler};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Result of one step dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub result: StepResult,
    /// Set when `result.success` is false
    pub error: Option<ActionError>,
}

impl StepOutcome {
    fn failed(step: &Step, error: ActionError, duration: Duration) -> Self {
        Self {
            result: StepResult::failed(&step.id, error.to_string(), duration),
            error: Some(error),
        }
    }
}

/// Step handlers keyed by kind
#[derive(Clone, Default)]
pub struct StepExecutor {
    handlers: Arc<DashMap<StepKind, Arc<dyn StepHandler>>>,
}

impl StepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: StepKind, handler: Arc<dyn StepHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            warn!(kind = %kind, "Step handler already registered, replacing");
        }
    }

    /// Builder-style registration
    pub fn with_handler(self, kind: StepKind, handler: Arc<dyn StepHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    pub fn has_handler(&self, kind: StepKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Execute `step` with at most `step_timeout` of wall-clock time
    pub async fn execute(
        &self,
        context: Arc<ActionContext>,
        step: Step,
        step_timeout: Duration,
    ) -> StepOutcome {
        let Some(handler) = self.handlers.get(&step.kind).map(|h| h.value().clone()) else {
            error!(
                request_id = %context.request_id,
                step_id = %step.id,
                kind = %step.kind,
                "No step handler registered for step kind"
            );
            let error = ActionError::UnknownStepKind {
                step_id: step.id.clone(),
                kind: step.kind.to_string(),
            };
            return StepOutcome::failed(&step, error, Duration::ZERO);
        };

        debug!(
            request_id = %context.request_id,
            step_id = %step.id,
            kind = %step.kind,
            timeout_ms = step_timeout.as_millis(),
            "Starting step execution"
        );

        let started = Instant::now();
        let task_step = step.clone();
        let task_context = context.clone();
        let mut task =
            tokio::spawn(async move { handler.execute(&task_context, &task_step).await });

        let outcome = match timeout(step_timeout, &mut task).await {
            Ok(Ok(Ok(output))) => StepOutcome {
                result: StepResult::succeeded(&step.id, output, started.elapsed()),
                error: None,
            },
            Ok(Ok(Err(e))) => {
                let error = ActionError::StepFailure {
                    step_id: step.id.clone(),
                    reason: format!("{e:#}"),
                };
                StepOutcome::failed(&step, error, started.elapsed())
            }
            Ok(Err(join_error)) => {
                let reason = if join_error.is_panic() {
                    "step handler panicked".to_string()
                } else {
                    format!("step task cancelled: {join_error}")
                };
                StepOutcome::failed(
                    &step,
                    ActionError::StepFailure {
                        step_id: step.id.clone(),
                        reason,
                    },
                    started.elapsed(),
                )
            }
            Err(_) => {
                // Dropping the handle detaches the task; the external call is not interrupted
                warn!(
                    request_id = %context.request_id,
                    step_id = %step.id,
                    timeout_ms = step_timeout.as_millis(),
                    "Step execution timed out, detaching in-flight call"
                );
                let error = ActionError::Timeout {
                    operation: format!("step {}", step.id),
                    timeout: step_timeout,
                };
                StepOutcome::failed(&step, error, started.elapsed())
            }
        };

        match &outcome.error {
            None => info!(
                request_id = %context.request_id,
                step_id = %step.id,
                duration_ms = outcome.result.duration.as_millis(),
                transaction_id = outcome.result.transaction_id(),
                "Step execution completed"
            ),
            Some(error) => warn!(
                request_id = %context.request_id,
                step_id = %step.id,
                duration_ms = outcome.result.duration.as_millis(),
                error = %error,
                "Step execution failed"
            ),
        }

        outcome
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<StepKind> = self.handlers.iter().map(|e| *e.key()).collect();
        f.debug_struct("StepExecutor").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionPriority, StepOutput};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct EchoHandler;

    #[async_trait]
    impl StepHandler for EchoHandler {
        async fn execute(&self, _: &ActionContext, step: &Step) -> anyhow::Result<StepOutput> {
            Ok(StepOutput::new(step.payload.clone()).with_transaction("tx-1"))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl StepHandler for FailingHandler {
        async fn execute(&self, _: &ActionContext, _: &Step) -> anyhow::Result<StepOutput> {
            anyhow::bail!("marketplace returned 503")
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl StepHandler for SlowHandler {
        async fn execute(&self, _: &ActionContext, _: &Step) -> anyhow::Result<StepOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(StepOutput::default())
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl StepHandler for PanickingHandler {
        async fn execute(&self, _: &ActionContext, _: &Step) -> anyhow::Result<StepOutput> {
            panic!("handler bug")
        }
    }

    fn context() -> Arc<ActionContext> {
        Arc::new(ActionContext {
            request_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            action_type: "purchase".to_string(),
            priority: ActionPriority::Medium,
            metadata: HashMap::new(),
            attempt: 0,
        })
    }

    #[tokio::test]
    async fn test_dispatches_by_kind() {
        let executor = StepExecutor::new()
            .with_handler(StepKind::RemoteQuery, Arc::new(EchoHandler))
            .with_handler(StepKind::ExternalApi, Arc::new(FailingHandler));

        let step = Step::new("balance", StepKind::RemoteQuery, "read balance")
            .with_payload(json!({"account": "0x01"}));
        let outcome = executor
            .execute(context(), step, Duration::from_secs(1))
            .await;

        assert!(outcome.result.success);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.result.transaction_id(), Some("tx-1"));
        assert_eq!(
            outcome.result.output.unwrap().data,
            json!({"account": "0x01"})
        );
    }

    #[tokio::test]
    async fn test_handler_error_is_step_failure() {
        let executor =
            StepExecutor::new().with_handler(StepKind::ExternalApi, Arc::new(FailingHandler));
        let step = Step::new("list", StepKind::ExternalApi, "list on marketplace");

        let outcome = executor
            .execute(context(), step, Duration::from_secs(1))
            .await;

        assert!(!outcome.result.success);
        assert_eq!(
            outcome.error,
            Some(ActionError::StepFailure {
                step_id: "list".to_string(),
                reason: "marketplace returned 503".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_missing_handler_is_unknown_step_kind() {
        let executor = StepExecutor::new();
        let step = Step::new("check", StepKind::Validation, "check funds");

        let outcome = executor
            .execute(context(), step, Duration::from_secs(1))
            .await;

        assert!(matches!(
            outcome.error,
            Some(ActionError::UnknownStepKind { .. })
        ));
        assert!(!executor.has_handler(StepKind::Validation));
    }

    #[tokio::test]
    async fn test_timeout_detaches_step() {
        let executor =
            StepExecutor::new().with_handler(StepKind::RemoteMutation, Arc::new(SlowHandler));
        let step = Step::new("buy", StepKind::RemoteMutation, "submit purchase");

        let outcome = executor
            .execute(context(), step, Duration::from_millis(20))
            .await;

        assert!(matches!(outcome.error, Some(ActionError::Timeout { .. })));
        assert!(outcome.result.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let executor =
            StepExecutor::new().with_handler(StepKind::Validation, Arc::new(PanickingHandler));
        let step = Step::new("check", StepKind::Validation, "check funds");

        let outcome = executor
            .execute(context(), step, Duration::from_secs(1))
            .await;

        assert_eq!(
            outcome.result.error.as_deref(),
            Some("Step check failed: step handler panicked")
        );
    }
}
