//! # Action Handler Registry
//!
//! Maps action type strings to their [`ActionHandler`] implementations. Lookups happen on
//! every submit, so unknown action types are rejected before anything is queued.

use crate::error::{ActionError, Result};
use crate::orchestration::types::ActionHandler;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct ActionHandlerRegistry {
    handlers: Arc<DashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own `action_type()`, replacing any previous one
    pub fn register(&self, handler: Arc<dyn ActionHandler>) {
        let action_type = handler.action_type().to_string();

        if self
            .handlers
            .insert(action_type.clone(), handler)
            .is_some()
        {
            warn!(action_type = %action_type, "Action handler already registered, replacing");
        } else {
            info!(action_type = %action_type, "Action handler registered");
        }
    }

    pub fn get(&self, action_type: &str) -> Result<Arc<dyn ActionHandler>> {
        self.handlers
            .get(action_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ActionError::UnknownActionType(action_type.to_string()))
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Registered action types, sorted
    pub fn action_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for ActionHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHandlerRegistry")
            .field("action_types", &self.action_types())
            .finish()
    }
}
