//! # Models
//!
//! Data carried through the engine: requests, executions, steps and results.

pub mod action_execution;
pub mod action_request;
pub mod action_result;
pub mod step;

pub use action_execution::ActionExecution;
pub use action_request::{ActionPriority, ActionRequest, SubmitOptions};
pub use action_result::ActionResult;
pub use step::{RollbackStep, Step, StepKind, StepOutput, StepResult};
