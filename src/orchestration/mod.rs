//! # Orchestration Engine
//!
//! Priority scheduling and saga execution for user-submitted actions.
//!
//! ## Core Components
//!
//! - **ActionScheduler**: Public API. Admission control, priority dispatch under a
//!   concurrency limit, cancellation, status queries and shutdown
//! - **ActionQueue**: Ordered waiting room (priority, then ready time, then submission order)
//! - **SagaRunner**: One attempt of an action: validate, plan, run steps in order,
//!   compensate in reverse on failure
//! - **StepExecutor**: Dispatches a single step to its kind's handler under a deadline
//! - **RetryCoordinator**: Exponential backoff decisions and the timers of pending retries
//!
//! Business logic plugs in through the traits in [`types`].

pub mod action_queue;
pub mod retry_coordinator;
pub mod saga_runner;
pub mod scheduler;
pub mod step_executor;
pub mod types;

pub use action_queue::{ActionQueue, QueueSelection};
pub use retry_coordinator::{RetryCoordinator, RetryDecision};
pub use saga_runner::{RollbackReport, SagaOutcome, SagaPhase, SagaRunner, SagaSnapshot};
pub use scheduler::{ActionScheduler, ActionSchedulerBuilder, EngineMetrics, ShutdownSummary};
pub use step_executor::{StepExecutor, StepOutcome};
pub use types::{ActionContext, ActionHandler, CompensationHook, StepHandler};
