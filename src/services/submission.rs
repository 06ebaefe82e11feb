use std::sync::Arc;

use crate::models::task::{ErrorKind, TaskEnvelope, TaskError, TaskId, TaskRecord, TaskStatus};
use crate::services::cache::{ResultStore, StoreError};
use crate::services::queue::{QueueChannel, QueueError};

/// A task that reached the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    pub task_id: TaskId,
    pub subject: String,
    pub status: TaskStatus,
}

/// Creates tasks: records them as `queued`, then publishes their envelope.
///
/// The record is always written before the envelope is published so a
/// worker can never pick up a task whose record does not exist yet.
#[derive(Clone)]
pub struct SubmissionService {
    store: ResultStore,
    queue: Arc<dyn QueueChannel>,
}

impl SubmissionService {
    pub fn new(store: ResultStore, queue: Arc<dyn QueueChannel>) -> Self {
        Self { store, queue }
    }

    /// Submit one subject. Duplicate subjects get independent tasks.
    pub async fn submit(&self, subject: &str) -> Result<Submitted, SubmitError> {
        let task_id = TaskId::generate();
        let record = TaskRecord::queued(task_id, subject);

        if let Err(source) = self.store.put(&record).await {
            tracing::error!(task_id = %task_id, subject = %subject, error = %source, "Failed to record task");
            return Err(SubmitError::Store { task_id, source });
        }

        if let Err(source) = self.queue.publish(&TaskEnvelope::for_record(&record)).await {
            tracing::error!(task_id = %task_id, subject = %subject, error = %source, "Failed to publish task");
            metrics::counter!("tasks_publish_failed_total").increment(1);
            self.mark_unpublished(&record, &source).await;
            return Err(SubmitError::Publish { task_id, source });
        }

        metrics::counter!("tasks_submitted_total").increment(1);
        tracing::info!(task_id = %task_id, subject = %subject, "Task queued");

        Ok(Submitted {
            task_id,
            subject: record.subject,
            status: TaskStatus::Queued,
        })
    }

    /// Record the publish failure so pollers see `failed` instead of a task
    /// that stays `queued` until it expires. If this write fails too, the
    /// record stays `queued`.
    async fn mark_unpublished(&self, record: &TaskRecord, source: &QueueError) {
        let error = TaskError::new(ErrorKind::Publish, format!("failed to publish task: {source}"));
        let Ok(failed) = record.fail(error) else {
            return;
        };
        if let Err(e) = self.store.put(&failed).await {
            tracing::error!(
                task_id = %record.task_id,
                error = %e,
                "Failed to mark unpublished task; it stays queued until expiry"
            );
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to record task {task_id}: {source}")]
    Store {
        task_id: TaskId,
        #[source]
        source: StoreError,
    },

    #[error("failed to publish task {task_id}: {source}")]
    Publish {
        task_id: TaskId,
        #[source]
        source: QueueError,
    },
}

impl SubmitError {
    pub fn task_id(&self) -> TaskId {
        match self {
            SubmitError::Store { task_id, .. } | SubmitError::Publish { task_id, .. } => *task_id,
        }
    }

    /// Summary suitable for a per-item batch result.
    pub fn to_task_error(&self) -> TaskError {
        match self {
            SubmitError::Store { .. } => TaskError::new(ErrorKind::Store, self.to_string()),
            SubmitError::Publish { .. } => TaskError::new(ErrorKind::Publish, self.to_string()),
        }
    }
}
