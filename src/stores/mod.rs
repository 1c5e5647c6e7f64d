//! # Stores
//!
//! Storage collaborators used by the engine. Neither store is a source of truth for
//! scheduling decisions:
//!
//! - [`EphemeralStore`]: key-value store with TTL holding execution snapshots for observers
//! - [`HistoryStore`]: append-only store receiving one record per terminal execution
//!
//! In-memory implementations are provided for tests and single-process deployments.
//!
//! ## Usage
//!
//! ```rust
//! use saga_core::constants::snapshot_key;
//! use saga_core::stores::{EphemeralStore, InMemoryEphemeralStore};
//! use std::time::Duration;
//! use uuid::Uuid;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryEphemeralStore::new();
//! let key = snapshot_key(&Uuid::new_v4());
//!
//! store
//!     .set(&key, serde_json::json!({"phase": "executing"}), Duration::from_secs(60))
//!     .await
//!     .unwrap();
//! assert_eq!(
//!     store.get(&key).await.unwrap(),
//!     Some(serde_json::json!({"phase": "executing"}))
//! );
//!
//! store.delete(&key).await.unwrap();
//! assert_eq!(store.get(&key).await.unwrap(), None);
//! # });
//! ```

pub mod ephemeral;
pub mod history;

pub use ephemeral::{EphemeralStore, InMemoryEphemeralStore};
pub use history::{HistoryRecord, HistoryStore, InMemoryHistoryStore};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization failed: {0}")]
    Serialization(String),
    #[error("Internal store error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

impl From<StoreError> for crate::error::ActionError {
    fn from(error: StoreError) -> Self {
        crate::error::ActionError::StoreError(error.to_string())
    }
}
