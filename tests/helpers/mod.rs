//! Shared fixtures for the integration tests: a scripted extractor, a queue
//! that can refuse publishes, and a harness wiring everything to the
//! in-memory backends.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sintegra_scraper::app_state::AppState;
use sintegra_scraper::models::registry::RegistryRecord;
use sintegra_scraper::models::task::TaskEnvelope;
use sintegra_scraper::services::cache::ResultStore;
use sintegra_scraper::services::extractor::{ExtractError, Extractor};
use sintegra_scraper::services::memory::{MemoryBackend, MemoryDurableStore, MemoryQueue};
use sintegra_scraper::services::persistence::{DurableStore, PersistenceGate};
use sintegra_scraper::services::queue::{Delivery, QueueChannel, QueueError};
use sintegra_scraper::services::worker::Worker;

pub const VALID_CNPJ: &str = "00006486000175";
pub const VALID_CNPJ_2: &str = "00012377000160";
pub const VALID_CNPJ_3: &str = "00022244000175";

pub const TTL: Duration = Duration::from_secs(3600);

/// What the scripted extractor returns for a subject.
#[derive(Debug, Clone)]
pub enum Script {
    Found(RegistryRecord),
    Empty,
    Network,
    Parse,
}

/// Extractor answering from a per-subject script. Unscripted subjects get a
/// populated record.
#[derive(Default)]
pub struct ScriptedExtractor {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, subject: &str, script: Script) {
        self.scripts.lock().unwrap().insert(subject.to_string(), script);
    }

    /// Make every lookup take `delay` (tokio clock).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self, subject: &str) -> usize {
        self.calls.lock().unwrap().get(subject).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

pub fn sample_record(subject: &str) -> RegistryRecord {
    RegistryRecord {
        cnpj: Some(sintegra_scraper::services::cnpj::mask_cnpj(subject)),
        state_registration: Some("10.123.456-7".to_string()),
        legal_name: Some("EMPRESA EXEMPLO LTDA".to_string()),
        registration_status: Some("ATIVO".to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, subject: &str) -> Result<RegistryRecord, ExtractError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(subject.to_string())
            .or_default() += 1;

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let script = self.scripts.lock().unwrap().get(subject).cloned();
        match script {
            None => Ok(sample_record(subject)),
            Some(Script::Found(record)) => Ok(record),
            Some(Script::Empty) => Ok(RegistryRecord::default()),
            Some(Script::Network) => Err(ExtractError::Network("connection reset".into())),
            Some(Script::Parse) => Err(ExtractError::Parse("unexpected page layout".into())),
        }
    }
}

/// Memory queue that refuses to publish envelopes for chosen subjects.
#[derive(Default)]
pub struct FlakyQueue {
    pub inner: MemoryQueue,
    refused: Mutex<HashSet<String>>,
}

impl FlakyQueue {
    pub fn refuse(&self, subject: &str) {
        self.refused.lock().unwrap().insert(subject.to_string());
    }
}

#[async_trait]
impl QueueChannel for FlakyQueue {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        if self.refused.lock().unwrap().contains(&envelope.subject) {
            return Err(QueueError::Unavailable("broker refused publish".into()));
        }
        self.inner.publish(envelope).await
    }

    async fn consume(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        self.inner.consume(wait).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.inner.ack(delivery).await
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.inner.nack(delivery).await
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        self.inner.depth().await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.inner.ping().await
    }
}

/// Everything wired to the in-memory backends.
pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub store: ResultStore,
    pub queue: Arc<FlakyQueue>,
    pub extractor: Arc<ScriptedExtractor>,
    pub durable: Arc<MemoryDurableStore>,
    pub persist: bool,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(false)
    }

    pub fn with_persistence() -> Self {
        Self::build(true)
    }

    fn build(persist: bool) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let store = ResultStore::new(backend.clone(), TTL);
        let queue = Arc::new(FlakyQueue::default());
        let extractor = Arc::new(ScriptedExtractor::new());
        let durable = Arc::new(MemoryDurableStore::new());

        let durable_for_api: Option<Arc<dyn DurableStore>> = if persist {
            Some(durable.clone())
        } else {
            None
        };
        let state = AppState::new(store.clone(), queue.clone(), durable_for_api);

        Self {
            backend,
            store,
            queue,
            extractor,
            durable,
            persist,
            state,
        }
    }

    pub fn gate(&self) -> PersistenceGate {
        if self.persist {
            PersistenceGate::enabled(self.durable.clone())
        } else {
            PersistenceGate::disabled()
        }
    }

    pub fn worker(&self, name: &str) -> Worker {
        Worker::new(
            name,
            self.store.clone(),
            self.queue.clone(),
            self.extractor.clone(),
            self.gate(),
            Duration::from_secs(30),
        )
    }

    /// Process envelopes until the queue stays empty for a moment.
    pub async fn drain(&self, worker: &Worker) -> usize {
        let mut processed = 0;
        while worker.run_once(Duration::from_millis(20)).await.is_some() {
            processed += 1;
        }
        processed
    }
}
