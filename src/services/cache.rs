use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::task::{TaskId, TaskRecord};

const KEY_PREFIX: &str = "sintegra:task:";

/// Expiring key-value store holding serialized task records.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Write `value` and (re)start its expiry countdown.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Values in key order; `None` for missing or expired keys.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Redis implementation of [`KeyValueBackend`].
pub struct RedisBackend {
    client: redis::Client,
}

impl RedisBackend {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        // MGET through cmd so a single key still yields a list.
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// Task records keyed by task id, each expiring `ttl` after its last write.
#[derive(Clone)]
pub struct ResultStore {
    backend: Arc<dyn KeyValueBackend>,
    ttl: Duration,
}

impl ResultStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// Replace the whole record and restart its TTL.
    pub async fn put(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        self.backend
            .set_ex(&key_for(&record.task_id), payload, self.ttl)
            .await
    }

    /// Fetch one record. An unreadable payload is logged and treated as
    /// missing, the same as in `get_many`.
    pub async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let Some(raw) = self.backend.get(&key_for(task_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<TaskRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Discarding unreadable task record");
                Ok(None)
            }
        }
    }

    /// Fetch several records at once. Missing ids are simply absent from
    /// the map; an unreadable payload is logged and treated as missing.
    pub async fn get_many(
        &self,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, TaskRecord>, StoreError> {
        let keys: Vec<String> = task_ids.iter().map(key_for).collect();
        let values = self.backend.mget(&keys).await?;

        let mut found = HashMap::with_capacity(task_ids.len());
        for (task_id, raw) in task_ids.iter().zip(values) {
            let Some(raw) = raw else { continue };
            match serde_json::from_str::<TaskRecord>(&raw) {
                Ok(record) => {
                    found.insert(*task_id, record);
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Discarding unreadable task record");
                }
            }
        }
        Ok(found)
    }

    /// Check backend connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.backend.ping().await
    }
}

fn key_for(task_id: &TaskId) -> String {
    format!("{KEY_PREFIX}{task_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Result store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskStatus;
    use crate::services::memory::MemoryBackend;

    fn store(ttl_secs: u64) -> ResultStore {
        ResultStore::new(Arc::new(MemoryBackend::new()), Duration::from_secs(ttl_secs))
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = store(60);
        let record = TaskRecord::queued(TaskId::generate(), "00006486000175");
        store.put(&record).await.unwrap();

        let loaded = store.get(&record.task_id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_missing_record_is_none() {
        let store = store(60);
        assert!(store.get(&TaskId::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_record_reads_as_missing() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ResultStore::new(backend.clone(), Duration::from_secs(60));
        let task_id = TaskId::generate();
        backend
            .set_ex(&key_for(&task_id), "{not a record".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.get(&task_id).await.unwrap().is_none());
        assert!(store.get_many(&[task_id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_many_omits_missing_ids() {
        let store = store(60);
        let a = TaskRecord::queued(TaskId::generate(), "00006486000175");
        let b = a.start_processing().unwrap();
        let other = TaskRecord::queued(TaskId::generate(), "00012377000160");
        store.put(&b).await.unwrap();
        store.put(&other).await.unwrap();

        let missing = TaskId::generate();
        let found = store
            .get_many(&[a.task_id, missing, other.task_id])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&a.task_id].status, TaskStatus::Processing);
        assert!(!found.contains_key(&missing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_restarts_ttl() {
        let store = store(10);
        let record = TaskRecord::queued(TaskId::generate(), "00006486000175");
        store.put(&record).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        store.put(&record.start_processing().unwrap()).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(store.get(&record.task_id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(store.get(&record.task_id).await.unwrap().is_none());
    }
}
