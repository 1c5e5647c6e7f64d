use async_trait::async_trait;
use parking_lot::Mutex;
use saga_core::config::{EngineConfig, RetryConfig, SagaConfig, SchedulerConfig};
use saga_core::models::{ActionResult, RollbackStep, Step, StepKind, StepOutput, StepResult};
use saga_core::orchestration::{
    ActionContext, ActionHandler, ActionScheduler, CompensationHook, StepHandler,
};
use saga_core::state_machine::ExecutionStatus;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared, ordered record of executed step ids
#[derive(Debug, Clone, Default)]
pub struct StepLog(Arc<Mutex<Vec<String>>>);

impl StepLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == entry).count()
    }
}

/// Step handler that records every call and fails the step ids it was told to fail.
///
/// Payload conventions: `{"tx": "..."}` sets the transaction id, `{"cost": n}` the resource
/// cost, `{"delay_ms": n}` sleeps before answering.
#[derive(Debug, Clone, Default)]
pub struct RecordingStepHandler {
    pub log: StepLog,
    failing: Arc<Mutex<HashSet<String>>>,
    /// Fail only the first N calls of a step id
    failing_times: Arc<Mutex<HashMap<String, usize>>>,
}

impl RecordingStepHandler {
    pub fn new(log: StepLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn failing_on(self, step_id: &str) -> Self {
        self.failing.lock().insert(step_id.to_string());
        self
    }

    pub fn failing_first(self, step_id: &str, times: usize) -> Self {
        self.failing_times.lock().insert(step_id.to_string(), times);
        self
    }
}

#[async_trait]
impl StepHandler for RecordingStepHandler {
    async fn execute(&self, _context: &ActionContext, step: &Step) -> anyhow::Result<StepOutput> {
        if let Some(delay) = step.payload.get("delay_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.log.record(step.id.clone());

        if self.failing.lock().contains(&step.id) {
            anyhow::bail!("{} rejected by remote", step.id);
        }
        {
            let mut failing_times = self.failing_times.lock();
            if let Some(remaining) = failing_times.get_mut(&step.id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    anyhow::bail!("{} temporarily unavailable", step.id);
                }
            }
        }

        let mut output = StepOutput::new(serde_json::json!({ "step": step.id }));
        if let Some(tx) = step.payload.get("tx").and_then(Value::as_str) {
            output = output.with_transaction(tx);
        }
        if let Some(cost) = step.payload.get("cost").and_then(Value::as_u64) {
            output = output.with_resource_cost(cost);
        }
        Ok(output)
    }
}

/// Tracks how many step calls overlap
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl ConcurrencyProbe {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepHandler for ConcurrencyProbe {
    async fn execute(&self, _context: &ActionContext, _step: &Step) -> anyhow::Result<StepOutput> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(StepOutput::default())
    }
}

/// Compensation hook that records the step it compensated
#[derive(Debug, Clone, Default)]
pub struct RecordingHook {
    pub log: StepLog,
}

#[async_trait]
impl CompensationHook for RecordingHook {
    async fn compensate(
        &self,
        _context: &ActionContext,
        rollback: &RollbackStep,
        original: &StepResult,
    ) -> anyhow::Result<()> {
        self.log
            .record(format!("{}<-{}", rollback.id, original.step_id));
        Ok(())
    }
}

/// Action handler with a fixed plan
#[derive(Debug, Clone)]
pub struct ScriptedAction {
    action_type: String,
    steps: Vec<Step>,
    rollback_steps: Vec<RollbackStep>,
    valid: bool,
    validation_delay: Option<Duration>,
    planning_error: Option<String>,
    pub processed: Arc<Mutex<Vec<ActionResult>>>,
}

impl ScriptedAction {
    pub fn new(action_type: &str, steps: Vec<Step>) -> Self {
        Self {
            action_type: action_type.to_string(),
            steps,
            rollback_steps: Vec::new(),
            valid: true,
            validation_delay: None,
            planning_error: None,
            processed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_rollback_steps(mut self, rollback_steps: Vec<RollbackStep>) -> Self {
        self.rollback_steps = rollback_steps;
        self
    }

    pub fn rejecting_input(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Validation answers only after `delay`
    pub fn validating_for(mut self, delay: Duration) -> Self {
        self.validation_delay = Some(delay);
        self
    }

    pub fn failing_planning(mut self, reason: &str) -> Self {
        self.planning_error = Some(reason.to_string());
        self
    }

    pub fn processed_results(&self) -> Vec<ActionResult> {
        self.processed.lock().clone()
    }
}

#[async_trait]
impl ActionHandler for ScriptedAction {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    async fn validate_input(&self, _context: &ActionContext, _input: &Value) -> anyhow::Result<bool> {
        if let Some(delay) = self.validation_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.valid)
    }

    async fn build_steps(&self, _context: &ActionContext, _input: &Value) -> anyhow::Result<Vec<Step>> {
        if let Some(reason) = &self.planning_error {
            anyhow::bail!("{reason}");
        }
        Ok(self.steps.clone())
    }

    async fn build_rollback_steps(
        &self,
        _context: &ActionContext,
        _input: &Value,
    ) -> anyhow::Result<Vec<RollbackStep>> {
        Ok(self.rollback_steps.clone())
    }

    async fn process_result(&self, _context: &ActionContext, result: &ActionResult) -> anyhow::Result<()> {
        self.processed.lock().push(result.clone());
        Ok(())
    }
}

/// `count` remote mutation steps `s1..sN`, each compensated by `r1..rN`
pub fn linear_saga(count: usize) -> (Vec<Step>, Vec<RollbackStep>) {
    (1..=count)
        .map(|i| {
            let step = Step::new(format!("s{i}"), StepKind::RemoteMutation, format!("step {i}"))
                .with_rollback(format!("r{i}"));
            let rollback =
                RollbackStep::new(format!("r{i}"), StepKind::RemoteMutation, format!("undo {i}"));
            (step, rollback)
        })
        .unzip()
}

/// Short timeouts and zero-ish retry delays for fast tests
pub fn test_config() -> EngineConfig {
    EngineConfig {
        scheduler: SchedulerConfig {
            max_concurrent_actions: 2,
            tick_interval_ms: 20,
            max_queue_size: 100,
            shutdown_grace_period_ms: 2_000,
        },
        saga: SagaConfig {
            action_timeout_ms: 2_000,
            step_timeout_ms: 1_000,
            snapshot_ttl_seconds: 60,
        },
        retry: RetryConfig {
            max_retry_attempts: 0,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        ..EngineConfig::default()
    }
}

/// Poll until the execution reaches `status` or the timeout elapses
pub async fn wait_for_status(
    scheduler: &ActionScheduler,
    request_id: Uuid,
    status: ExecutionStatus,
    timeout: Duration,
) -> bool {
    let poll = async {
        loop {
            if scheduler.get_status(request_id).map(|e| e.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}
