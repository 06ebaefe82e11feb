//! In-process backends for local runs and tests.
//!
//! They honour the same contracts as the Redis and PostgreSQL backends:
//! expiry measured from the last write, at-least-once delivery with explicit
//! ack/nack, and upsert-by-subject.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::models::registry::{RegistryRecord, StoredRegistryRecord};
use crate::models::task::TaskEnvelope;
use crate::services::cache::{KeyValueBackend, StoreError};
use crate::services::persistence::{DurableStore, PersistError};
use crate::services::queue::{Delivery, QueueChannel, QueueError};

/// Expiring map keyed by string, driven by the tokio clock.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, as if the server went away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory backend offline".into()));
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.read(key))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        self.check()?;
        Ok(keys.iter().map(|key| self.read(key)).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<String>,
    in_flight: Vec<String>,
}

/// FIFO work queue with an in-flight list, mirroring [`RedisQueue`].
///
/// [`RedisQueue`]: crate::services::queue::RedisQueue
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes consumed but neither acked nor nacked.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Hand every in-flight envelope out again, as after a consumer crash.
    pub fn redeliver_in_flight(&self) -> usize {
        let mut state = self.lock();
        let abandoned: Vec<String> = state.in_flight.drain(..).collect();
        let count = abandoned.len();
        for receipt in abandoned {
            state.ready.push_back(receipt);
        }
        drop(state);
        for _ in 0..count {
            self.notify.notify_one();
        }
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_pop(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.lock();
        let Some(receipt) = state.ready.pop_front() else {
            return Ok(None);
        };
        let envelope: TaskEnvelope = serde_json::from_str(&receipt)?;
        state.in_flight.push(receipt.clone());
        Ok(Some(Delivery { envelope, receipt }))
    }

    fn settle(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.lock();
        let position = state
            .in_flight
            .iter()
            .position(|r| *r == delivery.receipt)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.envelope.task_id.to_string()))?;
        state.in_flight.remove(position);
        Ok(())
    }
}

#[async_trait]
impl QueueChannel for MemoryQueue {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        let payload = serde_json::to_string(envelope)?;
        self.lock().ready.push_back(payload);
        self.notify.notify_one();
        Ok(())
    }

    async fn consume(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_pop()? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery)
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery)?;
        self.lock().ready.push_back(delivery.receipt.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.lock().ready.len() as u64)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Durable store keeping one row per subject in memory.
#[derive(Default)]
pub struct MemoryDurableStore {
    rows: Mutex<HashMap<String, StoredRegistryRecord>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make upserts fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful upserts so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn row(&self, subject: &str) -> Option<StoredRegistryRecord> {
        self.lock().get(subject).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredRegistryRecord>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn upsert(&self, subject: &str, record: &RegistryRecord) -> Result<(), PersistError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistError::Unavailable("memory store offline".into()));
        }
        let now = Utc::now();
        let mut rows = self.lock();
        let created_at = rows.get(subject).map(|row| row.created_at).unwrap_or(now);
        rows.insert(
            subject.to_string(),
            StoredRegistryRecord {
                subject: subject.to_string(),
                record: record.clone(),
                created_at,
                updated_at: now,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_many(
        &self,
        subjects: &[String],
    ) -> Result<Vec<StoredRegistryRecord>, PersistError> {
        let rows = self.lock();
        Ok(subjects
            .iter()
            .filter_map(|subject| rows.get(subject).cloned())
            .collect())
    }

    async fn ping(&self) -> Result<(), PersistError> {
        Ok(())
    }
}
