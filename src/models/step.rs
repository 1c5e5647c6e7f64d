use crate::orchestration::types::CompensationHook;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Kind of external operation a step performs; selects the step handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Read-only query against the remote ledger
    RemoteQuery,
    /// State-changing ledger transaction
    RemoteMutation,
    /// Call to an external marketplace or service API
    ExternalApi,
    /// Local precondition check
    Validation,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteQuery => write!(f, "remote_query"),
            Self::RemoteMutation => write!(f, "remote_mutation"),
            Self::ExternalApi => write!(f, "external_api"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

/// One forward step of a saga, produced by the action handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    pub description: String,
    pub payload: Value,
    /// Id of the rollback step that compensates this one
    pub rollback: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, kind: StepKind, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            payload: Value::Null,
            rollback: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_rollback(mut self, rollback_step_id: impl Into<String>) -> Self {
        self.rollback = Some(rollback_step_id.into());
        self
    }
}

/// Compensation step, run only when a later forward step fails
#[derive(Clone)]
pub struct RollbackStep {
    pub id: String,
    pub kind: StepKind,
    pub description: String,
    pub payload: Value,
    /// When present the hook runs instead of dispatching the step by kind
    pub compensation: Option<Arc<dyn CompensationHook>>,
}

impl RollbackStep {
    pub fn new(id: impl Into<String>, kind: StepKind, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            payload: Value::Null,
            compensation: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_compensation(mut self, hook: Arc<dyn CompensationHook>) -> Self {
        self.compensation = Some(hook);
        self
    }

    /// View of this rollback step as a plain step for dispatch through the executor
    pub fn as_step(&self) -> Step {
        Step {
            id: self.id.clone(),
            kind: self.kind,
            description: self.description.clone(),
            payload: self.payload.clone(),
            rollback: None,
        }
    }
}

impl fmt::Debug for RollbackStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackStep")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("description", &self.description)
            .field("payload", &self.payload)
            .field("has_compensation", &self.compensation.is_some())
            .finish()
    }
}

/// What a step handler returns on success
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub data: Value,
    /// Ledger transaction id, when the step submitted one
    pub transaction_id: Option<String>,
    /// Resource units charged for the step (e.g. computation or gas)
    pub resource_cost: Option<u64>,
}

impl StepOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_resource_cost(mut self, cost: u64) -> Self {
        self.resource_cost = Some(cost);
        self
    }
}

/// Recorded outcome of one step. Appended once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    pub output: Option<StepOutput>,
    pub error: Option<String>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl StepResult {
    pub fn succeeded(step_id: impl Into<String>, output: StepOutput, duration: Duration) -> Self {
        Self {
            step_id: step_id.into(),
            success: true,
            output: Some(output),
            error: None,
            duration,
        }
    }

    pub fn failed(step_id: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            step_id: step_id.into(),
            success: false,
            output: None,
            error: Some(error.into()),
            duration,
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.output.as_ref()?.transaction_id.as_deref()
    }

    pub fn resource_cost(&self) -> Option<u64> {
        self.output.as_ref()?.resource_cost
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
