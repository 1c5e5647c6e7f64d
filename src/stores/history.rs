use super::StoreError;
use crate::models::{ActionExecution, ActionResult};
use crate::state_machine::ExecutionStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Long-term record of a finished execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub execution_id: Uuid,
    pub request_id: Uuid,
    pub user_id: String,
    pub action_type: String,
    pub status: ExecutionStatus,
    pub retry_count: u32,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub result: Option<ActionResult>,
    pub compensation_incomplete: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl From<&ActionExecution> for HistoryRecord {
    fn from(execution: &ActionExecution) -> Self {
        Self {
            execution_id: execution.id,
            request_id: execution.request_id,
            user_id: execution.user_id.clone(),
            action_type: execution.action_type.clone(),
            status: execution.status,
            retry_count: execution.retry_count,
            error: execution.last_error.clone(),
            error_code: execution.error_code.clone(),
            result: execution.result.clone(),
            compensation_incomplete: execution.compensation_incomplete,
            started_at: execution.start_time,
            finished_at: execution.end_time.unwrap_or_else(Utc::now),
        }
    }
}

/// Durable append-only history of terminal executions
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: HistoryRecord) -> Result<(), StoreError>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<HistoryRecord>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<Vec<HistoryRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<(), StoreError> {
        self.records.write().push(record);
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<HistoryRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionRequest, SubmitOptions};
    use crate::state_machine::ExecutionEvent;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_list_by_user() {
        let store = InMemoryHistoryStore::new();

        for user in ["alice", "bob", "alice"] {
            let request = ActionRequest::new(user, "purchase", json!({}), SubmitOptions::default());
            let mut execution = ActionExecution::queued(&request);
            execution.apply(&ExecutionEvent::Cancel).unwrap();
            store.append(HistoryRecord::from(&execution)).await.unwrap();
        }

        assert_eq!(store.len(), 3);
        let alice = store.list_by_user("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|r| r.status == ExecutionStatus::Cancelled));
    }
}
