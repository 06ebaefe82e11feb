use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use crate::db::queries;
use crate::models::registry::{RegistryRecord, StoredRegistryRecord};

/// Relational store holding the latest registry snapshot per subject.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Create or fully replace the row for `subject`.
    async fn upsert(&self, subject: &str, record: &RegistryRecord) -> Result<(), PersistError>;

    /// Rows for the given subjects; subjects without a row are absent.
    async fn find_many(
        &self,
        subjects: &[String],
    ) -> Result<Vec<StoredRegistryRecord>, PersistError>;

    async fn ping(&self) -> Result<(), PersistError>;
}

/// PostgreSQL implementation of [`DurableStore`].
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn upsert(&self, subject: &str, record: &RegistryRecord) -> Result<(), PersistError> {
        queries::upsert_registry_record(&self.pool, subject, record).await?;
        Ok(())
    }

    async fn find_many(
        &self,
        subjects: &[String],
    ) -> Result<Vec<StoredRegistryRecord>, PersistError> {
        Ok(queries::get_registry_records(&self.pool, subjects).await?)
    }

    async fn ping(&self) -> Result<(), PersistError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// What the gate did with a completed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Persisted,
    /// Persistence is switched off.
    Disabled,
    /// The lookup returned no data.
    NoData,
    /// The write failed; the task record is unaffected.
    Failed,
}

impl PersistOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PersistOutcome::Persisted => "persisted",
            PersistOutcome::Disabled => "disabled",
            PersistOutcome::NoData => "no_data",
            PersistOutcome::Failed => "failed",
        }
    }
}

/// Decides whether a completed lookup is also written to the durable store.
///
/// Only non-empty results are written, and only when persistence is on.
/// A failed write is logged and reported through the returned outcome; it is
/// never retried here.
#[derive(Clone)]
pub struct PersistenceGate {
    store: Option<Arc<dyn DurableStore>>,
}

impl PersistenceGate {
    pub fn enabled(store: Arc<dyn DurableStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub async fn maybe_persist(
        &self,
        subject: &str,
        record: &RegistryRecord,
        has_data: bool,
    ) -> PersistOutcome {
        let outcome = match &self.store {
            None => PersistOutcome::Disabled,
            Some(_) if !has_data => PersistOutcome::NoData,
            Some(store) => match store.upsert(subject, record).await {
                Ok(()) => PersistOutcome::Persisted,
                Err(e) => {
                    tracing::error!(subject = %subject, error = %e, "Durable write failed");
                    PersistOutcome::Failed
                }
            },
        };
        metrics::counter!("durable_writes_total", "outcome" => outcome.as_str()).increment(1);
        outcome
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Durable store unavailable: {0}")]
    Unavailable(String),
}
