#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Saga Core
//!
//! Priority-scheduled saga execution for user-submitted actions against a remote ledger and
//! external marketplaces.
//!
//! ## Overview
//!
//! Users submit actions (a purchase, an arbitrage, a transfer). Each action type has a
//! handler that validates input and plans an ordered list of steps; each step kind has a
//! handler that performs the external call. The engine queues submissions by priority,
//! runs a bounded number of sagas concurrently, compensates completed steps in reverse when
//! a later step fails, and retries retryable failures with exponential backoff.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Scheduler, queue, saga runner, step executor and retry coordinator
//! - [`models`] - Requests, executions, steps and results
//! - [`state_machine`] - Execution status transitions
//! - [`registry`] - Action handler lookup and execution tracking with metrics
//! - [`events`] - Lifecycle observers and broadcast subscription
//! - [`stores`] - Snapshot and history storage collaborators
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use saga_core::config::EngineConfig;
//! use saga_core::models::SubmitOptions;
//! use saga_core::orchestration::{ActionHandler, ActionScheduler};
//! use std::sync::Arc;
//!
//! # async fn example(purchase: Arc<dyn ActionHandler>) -> saga_core::Result<()> {
//! let scheduler = ActionScheduler::builder(EngineConfig::default())
//!     .with_action_handler(purchase)
//!     .build()?;
//! scheduler.start();
//!
//! let request_id = scheduler
//!     .submit("user-1", "purchase", serde_json::json!({"item": 42}), SubmitOptions::default())
//!     .await?;
//! println!("{:?}", scheduler.get_status(request_id));
//!
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;
pub mod stores;

pub use config::{ConfigManager, EngineConfig};
pub use error::{ActionError, Result};
pub use events::{ActionEvent, ActionObserver, EventPublisher};
pub use models::{
    ActionExecution, ActionPriority, ActionRequest, ActionResult, RollbackStep, Step, StepKind,
    StepOutput, StepResult, SubmitOptions,
};
pub use orchestration::{
    ActionContext, ActionHandler, ActionScheduler, CompensationHook, EngineMetrics, StepHandler,
};
pub use state_machine::{ExecutionEvent, ExecutionStatus};
