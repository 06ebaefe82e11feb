use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::models::registry::RegistryRecord;
use crate::models::task::{ErrorKind, TaskRecord, TaskStatus};
use crate::services::cache::ResultStore;
use crate::services::extractor::{ExtractError, Extractor};
use crate::services::persistence::{PersistOutcome, PersistenceGate};
use crate::services::queue::{Delivery, QueueChannel};

/// How long one `consume` call waits before the loop re-checks shutdown.
const CONSUME_WAIT: Duration = Duration::from_secs(5);

/// Pause after a queue error before consuming again.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What handling one delivery amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed {
        has_data: bool,
        persisted: PersistOutcome,
    },
    Failed(ErrorKind),
    /// Redelivery of a task that had already finished; acked untouched.
    AlreadyTerminal,
    /// The task record expired before the envelope was handled.
    Expired,
    /// The result store could not be written; the envelope went back to
    /// the queue.
    Requeued,
}

/// Consumes task envelopes and drives each task to a terminal state.
///
/// Several workers may share one queue. Each task is made safe to handle
/// more than once by reading its record before doing any work: a terminal
/// record means the envelope is a redelivery and is only acknowledged.
pub struct Worker {
    name: String,
    store: ResultStore,
    queue: Arc<dyn QueueChannel>,
    extractor: Arc<dyn Extractor>,
    gate: PersistenceGate,
    extraction_deadline: Duration,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        store: ResultStore,
        queue: Arc<dyn QueueChannel>,
        extractor: Arc<dyn Extractor>,
        gate: PersistenceGate,
        extraction_deadline: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            queue,
            extractor,
            gate,
            extraction_deadline,
        }
    }

    /// Process envelopes until `shutdown` flips to `true`. The envelope in
    /// hand is always finished before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = %self.name, "Worker loop started");
        while !*shutdown.borrow() {
            let consumed = tokio::select! {
                _ = shutdown.changed() => break,
                consumed = self.queue.consume(CONSUME_WAIT) => consumed,
            };

            match consumed {
                Ok(Some(delivery)) => {
                    self.process(&delivery).await;
                }
                Ok(None) => {
                    tracing::trace!(worker = %self.name, "No tasks available");
                }
                Err(e) => {
                    tracing::error!(worker = %self.name, error = %e, "Failed to consume from queue");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
        tracing::info!(worker = %self.name, "Worker loop stopped");
    }

    /// Consume and process at most one envelope, waiting up to `wait`.
    pub async fn run_once(&self, wait: Duration) -> Option<ProcessOutcome> {
        match self.queue.consume(wait).await {
            Ok(Some(delivery)) => Some(self.process(&delivery).await),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(worker = %self.name, error = %e, "Failed to consume from queue");
                None
            }
        }
    }

    /// Drive one delivered task through `processing` to a terminal state.
    pub async fn process(&self, delivery: &Delivery) -> ProcessOutcome {
        let envelope = &delivery.envelope;
        let task_id = envelope.task_id;

        let current = match self.store.get(&task_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(worker = %self.name, task_id = %task_id, "Task record expired before processing, dropping");
                self.ack(delivery).await;
                return ProcessOutcome::Expired;
            }
            Err(e) => {
                tracing::error!(worker = %self.name, task_id = %task_id, error = %e, "Failed to read task record");
                return self.requeue(delivery).await;
            }
        };

        if current.is_terminal() {
            tracing::info!(
                worker = %self.name,
                task_id = %task_id,
                status = %current.status,
                "Task already finished, acknowledging redelivery"
            );
            metrics::counter!("tasks_redelivered_total").increment(1);
            self.ack(delivery).await;
            return ProcessOutcome::AlreadyTerminal;
        }
        if current.status == TaskStatus::Processing {
            tracing::warn!(worker = %self.name, task_id = %task_id, "Resuming task left in processing");
        }

        let Ok(processing) = current.start_processing() else {
            self.ack(delivery).await;
            return ProcessOutcome::AlreadyTerminal;
        };
        if let Err(e) = self.store.put(&processing).await {
            tracing::error!(worker = %self.name, task_id = %task_id, error = %e, "Failed to mark task processing");
            return self.requeue(delivery).await;
        }

        tracing::info!(worker = %self.name, task_id = %task_id, subject = %envelope.subject, "Processing task");
        let start = Instant::now();
        let extracted = match tokio::time::timeout(
            self.extraction_deadline,
            self.extractor.extract(&processing.subject),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractError::Timeout(self.extraction_deadline.as_secs())),
        };
        metrics::histogram!("extraction_seconds").record(start.elapsed().as_secs_f64());

        let terminal = match &extracted {
            Ok(record) => processing.complete(record.clone()),
            Err(e) => processing.fail(e.into()),
        };
        let Ok(terminal) = terminal else {
            self.ack(delivery).await;
            return ProcessOutcome::AlreadyTerminal;
        };

        // Another delivery of this task may have finished while we extracted.
        match self.store.get(&task_id).await {
            Ok(Some(latest)) if latest.is_terminal() => {
                tracing::info!(worker = %self.name, task_id = %task_id, "Task finished elsewhere, discarding result");
                self.ack(delivery).await;
                return ProcessOutcome::AlreadyTerminal;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(worker = %self.name, task_id = %task_id, error = %e, "Failed to re-read task record");
                return self.requeue(delivery).await;
            }
        }

        if let Err(e) = self.store.put(&terminal).await {
            tracing::error!(worker = %self.name, task_id = %task_id, error = %e, "Failed to store task result");
            return self.requeue(delivery).await;
        }

        let outcome = match extracted {
            Ok(record) => self.finish_completed(&terminal, &record).await,
            Err(e) => {
                tracing::warn!(
                    worker = %self.name,
                    task_id = %task_id,
                    kind = %e.kind(),
                    error = %e,
                    "Task failed"
                );
                metrics::counter!("tasks_failed_total", "kind" => e.kind().as_ref().to_string())
                    .increment(1);
                ProcessOutcome::Failed(e.kind())
            }
        };

        self.ack(delivery).await;
        outcome
    }

    async fn finish_completed(
        &self,
        terminal: &TaskRecord,
        record: &RegistryRecord,
    ) -> ProcessOutcome {
        let has_data = terminal.has_data;
        let persisted = if has_data {
            self.gate.maybe_persist(&terminal.subject, record, true).await
        } else {
            PersistOutcome::NoData
        };

        tracing::info!(
            worker = %self.name,
            task_id = %terminal.task_id,
            has_data,
            persisted = persisted.as_str(),
            "Task completed"
        );
        metrics::counter!("tasks_completed_total", "has_data" => has_data.to_string())
            .increment(1);

        ProcessOutcome::Completed {
            has_data,
            persisted,
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery).await {
            // The task record is already final; a redelivery will be a no-op.
            tracing::error!(worker = %self.name, task_id = %delivery.envelope.task_id, error = %e, "Failed to ack envelope");
        }
    }

    async fn requeue(&self, delivery: &Delivery) -> ProcessOutcome {
        if let Err(e) = self.queue.nack(delivery).await {
            tracing::error!(worker = %self.name, task_id = %delivery.envelope.task_id, error = %e, "Failed to nack envelope");
        }
        ProcessOutcome::Requeued
    }
}
