use super::step::StepResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome of one saga attempt, handed to `process_result` and stored on the execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    /// Step outputs keyed by step id
    pub data: Value,
    pub error: Option<String>,
    /// External transaction id surfaced from the step that exposed one
    pub transaction_id: Option<String>,
    pub resource_cost: Option<u64>,
    pub steps: Vec<StepResult>,
    pub execution_time_ms: u64,
}

impl ActionResult {
    /// Assemble the result of a saga whose steps all succeeded.
    ///
    /// The transaction id and resource cost come from the last step exposing them and are
    /// copied as-is.
    pub fn completed(steps: Vec<StepResult>, execution_time_ms: u64) -> Self {
        let mut data = Map::new();
        for step in &steps {
            if let Some(output) = &step.output {
                data.insert(step.step_id.clone(), output.data.clone());
            }
        }

        let transaction_id = steps
            .iter()
            .rev()
            .find_map(|s| s.transaction_id().map(str::to_string));
        let resource_cost = steps.iter().rev().find_map(StepResult::resource_cost);

        Self {
            success: true,
            data: Value::Object(data),
            error: None,
            transaction_id,
            resource_cost,
            steps,
            execution_time_ms,
        }
    }

    pub fn failed(error: impl Into<String>, steps: Vec<StepResult>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            transaction_id: None,
            resource_cost: None,
            steps,
            execution_time_ms,
        }
    }
}
