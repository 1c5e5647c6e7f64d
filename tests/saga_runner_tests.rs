mod common;

use common::*;
use saga_core::config::SagaConfig;
use saga_core::constants::snapshot_key;
use saga_core::error::ActionError;
use saga_core::models::{ActionRequest, RollbackStep, Step, StepKind, SubmitOptions};
use saga_core::orchestration::{
    ActionContext, ActionHandler, SagaOutcome, SagaPhase, SagaRunner, SagaSnapshot, StepExecutor,
};
use saga_core::registry::ExecutionRegistry;
use saga_core::state_machine::{ExecutionEvent, ExecutionStatus};
use saga_core::stores::{EphemeralStore, InMemoryEphemeralStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    runner: SagaRunner,
    executions: ExecutionRegistry,
    snapshots: Arc<InMemoryEphemeralStore>,
    log: StepLog,
}

impl Harness {
    fn new(step_handler: RecordingStepHandler, config: SagaConfig) -> Self {
        let log = step_handler.log.clone();
        let handler = Arc::new(step_handler);
        let executor = StepExecutor::new()
            .with_handler(StepKind::RemoteMutation, handler.clone())
            .with_handler(StepKind::RemoteQuery, handler);
        let executions = ExecutionRegistry::new(100);
        let snapshots = Arc::new(InMemoryEphemeralStore::new());
        let runner = SagaRunner::new(executor, executions.clone(), snapshots.clone(), config);
        Self {
            runner,
            executions,
            snapshots,
            log,
        }
    }

    async fn run(&self, handler: Arc<dyn ActionHandler>) -> (SagaOutcome, ActionRequest) {
        let request = ActionRequest::new(
            "alice",
            handler.action_type(),
            json!({"item": 7}),
            SubmitOptions::default(),
        );
        let execution = self.executions.register(&request);
        self.executions
            .apply(request.id, ExecutionEvent::Start)
            .unwrap();
        let context = Arc::new(ActionContext::for_request(&request, execution.id, 0));
        let outcome = self.runner.execute(context, &request.input, handler).await;
        (outcome, request)
    }
}

fn default_harness(step_handler: RecordingStepHandler) -> Harness {
    Harness::new(step_handler, SagaConfig::default())
}

#[tokio::test]
async fn test_failed_third_step_rolls_back_second_then_first() {
    let log = StepLog::default();
    let harness = default_harness(RecordingStepHandler::new(log.clone()).failing_on("s3"));
    let (steps, rollback_steps) = linear_saga(5);
    let action = Arc::new(ScriptedAction::new("purchase", steps).with_rollback_steps(rollback_steps));

    let (outcome, request) = harness.run(action.clone()).await;

    assert_eq!(harness.log.entries(), vec!["s1", "s2", "s3", "r2", "r1"]);
    assert!(!outcome.result.success);
    assert_eq!(
        outcome.error,
        Some(ActionError::StepFailure {
            step_id: "s3".to_string(),
            reason: "s3 rejected by remote".to_string(),
        })
    );
    let report = outcome.rollback.expect("rollback report");
    assert_eq!(report.attempted, vec!["r2", "r1"]);
    assert!(report.is_complete());

    // steps 4 and 5 never ran
    assert_eq!(outcome.result.steps.len(), 3);
    assert_eq!(
        harness.executions.status(request.id),
        Some(ExecutionStatus::RolledBack)
    );
    assert_eq!(action.processed_results().len(), 1);
}

#[tokio::test]
async fn test_rollback_failure_does_not_stop_remaining_compensation() {
    let log = StepLog::default();
    let harness = default_harness(
        RecordingStepHandler::new(log.clone())
            .failing_on("s3")
            .failing_on("r2"),
    );
    let (steps, rollback_steps) = linear_saga(3);
    let action = Arc::new(ScriptedAction::new("purchase", steps).with_rollback_steps(rollback_steps));

    let (outcome, _) = harness.run(action).await;

    assert_eq!(log.entries(), vec!["s1", "s2", "s3", "r2", "r1"]);
    assert!(outcome.compensation_incomplete());
    let report = outcome.rollback.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        &report.failures[0],
        ActionError::RollbackFailure { step_id, .. } if step_id == "r2"
    ));
}

#[tokio::test]
async fn test_compensation_hook_replaces_dispatch() {
    let log = StepLog::default();
    let harness = default_harness(RecordingStepHandler::new(log.clone()).failing_on("s2"));
    let hook = RecordingHook::default();

    let steps = vec![
        Step::new("reserve", StepKind::RemoteMutation, "reserve funds").with_rollback("release"),
        Step::new("s2", StepKind::RemoteMutation, "purchase"),
    ];
    let rollback_steps = vec![RollbackStep::new("release", StepKind::RemoteMutation, "release")
        .with_compensation(Arc::new(hook.clone()))];
    let action = Arc::new(ScriptedAction::new("purchase", steps).with_rollback_steps(rollback_steps));

    let (outcome, _) = harness.run(action).await;

    assert_eq!(log.entries(), vec!["reserve", "s2"]);
    assert_eq!(hook.log.entries(), vec!["release<-reserve"]);
    assert!(!outcome.compensation_incomplete());
}

#[tokio::test]
async fn test_transaction_id_and_cost_come_from_last_exposing_step() {
    let log = StepLog::default();
    let harness = default_harness(RecordingStepHandler::new(log));
    let steps = vec![
        Step::new("quote", StepKind::RemoteQuery, "quote").with_payload(json!({"tx": "tx-a", "cost": 3})),
        Step::new("buy", StepKind::RemoteMutation, "buy").with_payload(json!({"tx": "tx-b", "cost": 11})),
        Step::new("confirm", StepKind::RemoteQuery, "confirm"),
    ];
    let action = Arc::new(ScriptedAction::new("purchase", steps));

    let (outcome, request) = harness.run(action).await;

    assert!(outcome.result.success);
    assert_eq!(outcome.result.transaction_id.as_deref(), Some("tx-b"));
    assert_eq!(outcome.result.resource_cost, Some(11));
    assert_eq!(outcome.result.data["buy"]["step"], json!("buy"));

    let snapshot = harness
        .snapshots
        .get(&snapshot_key(&request.id))
        .await
        .unwrap()
        .expect("snapshot written");
    let snapshot: SagaSnapshot = serde_json::from_value(snapshot).unwrap();
    assert_eq!(snapshot.phase, SagaPhase::Completed);
    assert_eq!(snapshot.steps.len(), 3);
}

#[tokio::test]
async fn test_rejected_input_skips_steps_but_processes_result() {
    let log = StepLog::default();
    let harness = default_harness(RecordingStepHandler::new(log.clone()));
    let (steps, _) = linear_saga(2);
    let action = Arc::new(ScriptedAction::new("purchase", steps).rejecting_input());

    let (outcome, _) = harness.run(action.clone()).await;

    assert!(matches!(outcome.error, Some(ActionError::ValidationError(_))));
    assert!(!outcome.error.as_ref().unwrap().is_retryable());
    assert!(log.entries().is_empty());
    assert!(outcome.rollback.is_none());

    let processed = action.processed_results();
    assert_eq!(processed.len(), 1);
    assert!(!processed[0].success);
    assert!(processed[0].steps.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_validation_times_out_and_processes_result() {
    let log = StepLog::default();
    let harness = Harness::new(
        RecordingStepHandler::new(log.clone()),
        SagaConfig {
            action_timeout_ms: 100,
            step_timeout_ms: 100,
            snapshot_ttl_seconds: 60,
        },
    );
    let (steps, _) = linear_saga(1);
    let action = Arc::new(
        ScriptedAction::new("purchase", steps).validating_for(Duration::from_millis(200)),
    );

    let (outcome, _) = harness.run(action.clone()).await;

    match outcome.error {
        Some(ActionError::Timeout { operation, .. }) => assert_eq!(operation, "saga planning"),
        other => panic!("expected validation timeout, got {other:?}"),
    }
    assert!(log.entries().is_empty());
    assert_eq!(action.processed_results().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_step_cut_off_by_spent_deadline_records_failure() {
    let log = StepLog::default();
    let harness = Harness::new(
        RecordingStepHandler::new(log.clone()),
        SagaConfig {
            action_timeout_ms: 100,
            step_timeout_ms: 100,
            snapshot_ttl_seconds: 60,
        },
    );
    let (steps, rollback_steps) = linear_saga(2);
    // validation answers exactly at the deadline, leaving nothing for the first step
    let action = Arc::new(
        ScriptedAction::new("purchase", steps)
            .with_rollback_steps(rollback_steps)
            .validating_for(Duration::from_millis(100)),
    );

    let (outcome, _) = harness.run(action).await;

    match &outcome.error {
        Some(ActionError::Timeout { operation, .. }) => assert_eq!(operation, "action purchase"),
        other => panic!("expected saga timeout, got {other:?}"),
    }
    assert_eq!(outcome.result.steps.len(), 1);
    assert_eq!(outcome.result.steps[0].step_id, "s1");
    assert!(!outcome.result.steps[0].success);
    assert!(log.entries().is_empty());
    assert!(outcome.rollback.unwrap().attempted.is_empty());
}

#[tokio::test]
async fn test_step_naming_missing_rollback_step_fails_planning() {
    let log = StepLog::default();
    let harness = default_harness(RecordingStepHandler::new(log.clone()));
    let (steps, mut rollback_steps) = linear_saga(3);
    rollback_steps[1].id = "r2-typo".to_string();
    let action = Arc::new(ScriptedAction::new("purchase", steps).with_rollback_steps(rollback_steps));

    let (outcome, _) = harness.run(action).await;

    match outcome.error {
        Some(ActionError::PlanningFailed(reason)) => assert!(reason.contains("r2"), "{reason}"),
        other => panic!("expected planning failure, got {other:?}"),
    }
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn test_rollback_step_without_forward_step_fails_planning() {
    let log = StepLog::default();
    let harness = default_harness(RecordingStepHandler::new(log.clone()));
    let (_, rollback_steps) = linear_saga(5);
    // forward steps that name no rollback step
    let steps = (1..=5)
        .map(|i| Step::new(format!("s{i}"), StepKind::RemoteMutation, format!("step {i}")))
        .collect();
    let action = Arc::new(ScriptedAction::new("purchase", steps).with_rollback_steps(rollback_steps));

    let (outcome, _) = harness.run(action).await;

    match outcome.error {
        Some(ActionError::PlanningFailed(reason)) => assert!(reason.contains("r1"), "{reason}"),
        other => panic!("expected planning failure, got {other:?}"),
    }
    assert!(log.entries().is_empty());
    assert!(outcome.rollback.is_none());
}

#[tokio::test]
async fn test_unregistered_step_kind_fails_before_any_step() {
    let log = StepLog::default();
    let harness = default_harness(RecordingStepHandler::new(log.clone()));
    let steps = vec![
        Step::new("quote", StepKind::RemoteQuery, "quote"),
        Step::new("list", StepKind::ExternalApi, "list on marketplace"),
    ];
    let action = Arc::new(ScriptedAction::new("listing", steps));

    let (outcome, _) = harness.run(action.clone()).await;

    assert_eq!(
        outcome.error,
        Some(ActionError::UnknownStepKind {
            step_id: "list".to_string(),
            kind: "external_api".to_string(),
        })
    );
    assert!(log.entries().is_empty());
    assert!(outcome.rollback.is_none());
    assert_eq!(action.processed_results().len(), 1);
}

#[tokio::test]
async fn test_planning_failure_is_retryable() {
    let harness = default_harness(RecordingStepHandler::new(StepLog::default()));
    let action = Arc::new(ScriptedAction::new("purchase", Vec::new()).failing_planning("price feed down"));

    let (outcome, _) = harness.run(action).await;

    let error = outcome.error.unwrap();
    assert!(matches!(error, ActionError::PlanningFailed(_)));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_saga_deadline_bounds_slow_steps() {
    let log = StepLog::default();
    let harness = Harness::new(
        RecordingStepHandler::new(log.clone()),
        SagaConfig {
            action_timeout_ms: 100,
            step_timeout_ms: 1_000,
            snapshot_ttl_seconds: 60,
        },
    );
    let (mut steps, rollback_steps) = linear_saga(2);
    steps[1].payload = json!({"delay_ms": 500});
    let action = Arc::new(ScriptedAction::new("purchase", steps).with_rollback_steps(rollback_steps));

    let (outcome, _) = harness.run(action).await;

    match outcome.error {
        Some(ActionError::Timeout { operation, .. }) => assert_eq!(operation, "action purchase"),
        other => panic!("expected saga timeout, got {other:?}"),
    }
    // s1 completed and is compensated even though the deadline passed
    assert_eq!(outcome.rollback.unwrap().attempted, vec!["r1"]);
    assert!(log.entries().contains(&"r1".to_string()));
}
