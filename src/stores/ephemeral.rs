use super::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

/// Key-value store with per-entry TTL
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;

    /// Returns `None` for missing or expired keys
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process TTL map. Expired entries are dropped lazily on read and by [`purge_expired`].
///
/// [`purge_expired`]: InMemoryEphemeralStore::purge_expired
#[derive(Debug, Default)]
pub struct InMemoryEphemeralStore {
    entries: DashMap<String, (Value, Instant, Duration)>,
}

impl InMemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, (_, stored_at, ttl)| stored_at.elapsed() < *ttl);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed = removed, "Purged expired snapshot entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl EphemeralStore for InMemoryEphemeralStore {
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now(), ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let fresh = self.entries.get(key).map(|entry| {
            let (value, stored_at, ttl) = entry.value();
            (stored_at.elapsed() < *ttl).then(|| value.clone())
        });

        match fresh {
            None => Ok(None),
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove(key);
                Ok(None)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
