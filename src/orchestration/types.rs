//! # Orchestration Types
//!
//! The capability interfaces the engine drives. Business logic lives behind these traits:
//!
//! - [`ActionHandler`]: one implementation per action type (validate, plan, compensate, observe)
//! - [`StepHandler`]: one implementation per [`StepKind`](crate::models::StepKind), performing the
//!   external call (ledger query, ledger transaction, marketplace API, local check)
//! - [`CompensationHook`]: optional custom undo attached to a rollback step
//!
//! Implementations report failures through `anyhow::Result`; the engine turns them into
//! [`ActionError`](crate::error::ActionError) values at the boundary.

use crate::models::{
    ActionPriority, ActionRequest, ActionResult, RollbackStep, Step, StepOutput, StepResult,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Per-attempt context passed to every handler hook
#[derive(Debug, Clone, PartialEq)]
pub struct ActionContext {
    pub request_id: Uuid,
    pub execution_id: Uuid,
    pub user_id: String,
    pub action_type: String,
    pub priority: ActionPriority,
    pub metadata: HashMap<String, Value>,
    /// 0 on the first attempt, incremented by each retry
    pub attempt: u32,
}

impl ActionContext {
    pub fn for_request(request: &ActionRequest, execution_id: Uuid, attempt: u32) -> Self {
        Self {
            request_id: request.id,
            execution_id,
            user_id: request.user_id.clone(),
            action_type: request.action_type.clone(),
            priority: request.priority,
            metadata: request.metadata.clone(),
            attempt,
        }
    }
}

/// Pluggable behaviour of one action type
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Registry key, e.g. `"purchase"`
    fn action_type(&self) -> &str;

    /// Reject malformed input before any step is built. `Ok(false)` and `Err` both fail the
    /// action with a validation error.
    async fn validate_input(&self, context: &ActionContext, input: &Value) -> anyhow::Result<bool>;

    /// Ordered forward steps for this request
    async fn build_steps(&self, context: &ActionContext, input: &Value)
        -> anyhow::Result<Vec<Step>>;

    /// Compensation steps, referenced from forward steps through [`Step::rollback`]
    async fn build_rollback_steps(
        &self,
        _context: &ActionContext,
        _input: &Value,
    ) -> anyhow::Result<Vec<RollbackStep>> {
        Ok(Vec::new())
    }

    /// Called after every attempt that got past validation, successful or not
    async fn process_result(
        &self,
        _context: &ActionContext,
        _result: &ActionResult,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Executes steps of one kind against the outside world
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, context: &ActionContext, step: &Step) -> anyhow::Result<StepOutput>;
}

/// Custom undo for a rollback step
#[async_trait]
pub trait CompensationHook: Send + Sync {
    /// `original` is the result of the forward step being compensated
    async fn compensate(
        &self,
        context: &ActionContext,
        rollback: &RollbackStep,
        original: &StepResult,
    ) -> anyhow::Result<()>;
}
