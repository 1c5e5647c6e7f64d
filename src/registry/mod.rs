pub mod action_handler_registry;
pub mod execution_registry;

pub use action_handler_registry::ActionHandlerRegistry;
pub use execution_registry::{ExecutionMetrics, ExecutionRegistry, OutcomeMetrics};
