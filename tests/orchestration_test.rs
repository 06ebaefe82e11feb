//! Task lifecycle tests against the in-memory backends.
//!
//! Run with: cargo test --test orchestration_test

mod helpers;

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use helpers::*;
use sintegra_scraper::models::api::LookupStatus;
use sintegra_scraper::models::registry::RegistryRecord;
use sintegra_scraper::models::task::{ErrorKind, TaskEnvelope, TaskStatus};
use sintegra_scraper::services::persistence::PersistOutcome;
use sintegra_scraper::services::queue::QueueChannel;
use sintegra_scraper::services::submission::SubmitError;
use sintegra_scraper::services::worker::ProcessOutcome;

#[tokio::test]
async fn test_submit_then_process_completes_with_data() {
    let h = Harness::with_persistence();

    let submitted = assert_ok!(h.state.submission.submit(VALID_CNPJ).await);
    assert_eq!(submitted.status, TaskStatus::Queued);

    let queued = h.state.batch.get(&submitted.task_id.to_string()).await.unwrap();
    assert_eq!(queued.status, LookupStatus::Queued);
    assert_eq!(queued.cnpj.as_deref(), Some(VALID_CNPJ));
    assert!(!queued.has_data);

    let worker = h.worker("worker-1");
    let outcome = worker.run_once(Duration::from_millis(50)).await;
    assert_eq!(
        outcome,
        Some(ProcessOutcome::Completed {
            has_data: true,
            persisted: PersistOutcome::Persisted,
        })
    );

    let done = h.state.batch.get(&submitted.task_id.to_string()).await.unwrap();
    assert_eq!(done.status, LookupStatus::Completed);
    assert!(done.has_data);
    assert_eq!(done.result, Some(sample_record(VALID_CNPJ)));

    let row = h.durable.row(VALID_CNPJ).expect("row should be persisted");
    assert_eq!(row.record.legal_name.as_deref(), Some("EMPRESA EXEMPLO LTDA"));
}

#[tokio::test]
async fn test_duplicate_subjects_get_independent_tasks() {
    let h = Harness::new();
    let first = h.state.submission.submit(VALID_CNPJ).await.unwrap();
    let second = h.state.submission.submit(VALID_CNPJ).await.unwrap();
    assert_ne!(first.task_id, second.task_id);
    assert_eq!(h.queue.depth().await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_status_moves_forward_only() {
    let h = Harness::new();
    h.extractor.set_delay(Duration::from_secs(10));
    let submitted = h.state.submission.submit(VALID_CNPJ).await.unwrap();
    let id = submitted.task_id;

    let worker = Arc::new(h.worker("worker-1"));
    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run_once(Duration::from_secs(1)).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    let during = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(during.status, TaskStatus::Processing);

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, Some(ProcessOutcome::Completed { .. })));

    let after = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(after.status, TaskStatus::Completed);
    assert_eq!(after.created_at, during.created_at);
    assert!(after.updated_at >= during.updated_at);
}

#[tokio::test(start_paused = true)]
async fn test_records_expire_ttl_after_last_write() {
    let h = Harness::new();
    let submitted = h.state.submission.submit(VALID_CNPJ).await.unwrap();
    let id = submitted.task_id;

    tokio::time::advance(TTL - Duration::from_secs(60)).await;
    h.drain(&h.worker("worker-1")).await;
    let record = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Completed);

    // The terminal write restarted the clock.
    tokio::time::advance(TTL - Duration::from_secs(1)).await;
    assert!(h.store.get(&id).await.unwrap().is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(h.store.get(&id).await.unwrap().is_none());

    let lookup = h.state.batch.get(&id.to_string()).await.unwrap();
    assert_eq!(lookup.status, LookupStatus::NotFound);
}

#[tokio::test(start_paused = true)]
async fn test_envelope_outliving_its_record_is_dropped() {
    let h = Harness::new();
    h.state.submission.submit(VALID_CNPJ).await.unwrap();

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    let outcome = h.worker("worker-1").run_once(Duration::from_millis(10)).await;

    assert_eq!(outcome, Some(ProcessOutcome::Expired));
    assert_eq!(h.extractor.total_calls(), 0);
    assert_eq!(h.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_redelivered_envelope_is_not_reprocessed() {
    let h = Harness::with_persistence();
    let submitted = h.state.submission.submit(VALID_CNPJ).await.unwrap();
    let worker = h.worker("worker-1");
    h.drain(&worker).await;

    let finished = h.store.get(&submitted.task_id).await.unwrap().unwrap();
    h.queue
        .publish(&TaskEnvelope::for_record(&finished))
        .await
        .unwrap();

    let outcome = worker.run_once(Duration::from_millis(50)).await;
    assert_eq!(outcome, Some(ProcessOutcome::AlreadyTerminal));
    assert_eq!(h.extractor.calls(VALID_CNPJ), 1);
    assert_eq!(h.durable.writes(), 1);
    assert_eq!(h.store.get(&submitted.task_id).await.unwrap().unwrap(), finished);
}

#[tokio::test]
async fn test_envelope_abandoned_by_crashed_worker_is_redelivered() {
    let h = Harness::new();
    let submitted = h.state.submission.submit(VALID_CNPJ).await.unwrap();

    // A consumer takes the envelope and dies before acking.
    let lost = h.queue.consume(Duration::from_millis(10)).await.unwrap();
    assert!(lost.is_some());
    assert_eq!(h.queue.depth().await.unwrap(), 0);

    assert_eq!(h.queue.inner.redeliver_in_flight(), 1);
    let processed = h.drain(&h.worker("worker-2")).await;
    assert_eq!(processed, 1);

    let record = h.store.get(&submitted.task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_concurrent_workers_process_each_task_once() {
    let h = Harness::new();
    let subjects = [VALID_CNPJ, VALID_CNPJ_2, VALID_CNPJ_3];
    let mut ids = Vec::new();
    for i in 0..12 {
        let submitted = h.state.submission.submit(subjects[i % 3]).await.unwrap();
        ids.push(submitted.task_id);
    }

    let workers: Vec<_> = (1..=4).map(|n| h.worker(&format!("worker-{n}"))).collect();
    let processed: usize = join_all(workers.iter().map(|w| h.drain(w)))
        .await
        .into_iter()
        .sum();

    assert_eq!(processed, 12);
    assert_eq!(h.extractor.total_calls(), 12);
    for id in ids {
        let record = h.store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
    }
    assert_eq!(h.queue.inner.in_flight(), 0);
}

#[tokio::test]
async fn test_extraction_failures_are_classified() {
    let h = Harness::new();
    h.extractor.script(VALID_CNPJ, Script::Network);
    h.extractor.script(VALID_CNPJ_2, Script::Parse);
    let network = h.state.submission.submit(VALID_CNPJ).await.unwrap();
    let parse = h.state.submission.submit(VALID_CNPJ_2).await.unwrap();

    h.drain(&h.worker("worker-1")).await;

    let network = h.store.get(&network.task_id).await.unwrap().unwrap();
    assert_eq!(network.status, TaskStatus::Failed);
    assert_eq!(network.error.unwrap().kind, ErrorKind::Network);
    assert!(network.result.is_none());

    let parse = h.store.get(&parse.task_id).await.unwrap().unwrap();
    assert_eq!(parse.error.unwrap().kind, ErrorKind::Parse);
}

#[tokio::test]
async fn test_publish_failure_marks_task_failed() {
    let h = Harness::new();
    h.queue.refuse(VALID_CNPJ);

    let err = assert_err!(h.state.submission.submit(VALID_CNPJ).await);
    assert!(matches!(err, SubmitError::Publish { .. }));

    let record = h.store.get(&err.task_id()).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.error.unwrap().kind, ErrorKind::Publish);
    assert_eq!(h.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_store_outage_rejects_submission_before_publish() {
    let h = Harness::new();
    h.backend.set_unavailable(true);

    let err = assert_err!(h.state.submission.submit(VALID_CNPJ).await);
    assert!(matches!(err, SubmitError::Store { .. }));
    assert_eq!(h.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_batch_submission_reports_partial_failure() {
    let h = Harness::new();
    h.queue.refuse(VALID_CNPJ_2);
    let subjects = vec![
        VALID_CNPJ.to_string(),
        VALID_CNPJ_2.to_string(),
        VALID_CNPJ_3.to_string(),
    ];

    let items = h.state.batch.submit_batch(&subjects).await;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].status, TaskStatus::Queued);
    assert_eq!(items[1].status, TaskStatus::Failed);
    assert_eq!(items[1].error.as_ref().unwrap().kind, ErrorKind::Publish);
    assert_eq!(items[2].status, TaskStatus::Queued);
    assert_eq!(h.queue.depth().await.unwrap(), 2);

    let failed = h.store.get(&items[1].task_id).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_batch_lookup_groups_by_data() {
    let h = Harness::new();
    h.extractor.script(VALID_CNPJ_2, Script::Empty);
    h.extractor.script(VALID_CNPJ_3, Script::Network);
    let subjects = vec![
        VALID_CNPJ.to_string(),
        VALID_CNPJ_2.to_string(),
        VALID_CNPJ_3.to_string(),
    ];
    let items = h.state.batch.submit_batch(&subjects).await;
    h.drain(&h.worker("worker-1")).await;

    let unknown = uuid::Uuid::new_v4().to_string();
    let mut ids: Vec<String> = items.iter().map(|i| i.task_id.to_string()).collect();
    ids.push(unknown.clone());
    ids.push("not-a-task".to_string());
    let repeated = ids[0].clone();
    ids.push(repeated);

    let response = h.state.batch.get_batch(&ids).await.unwrap();
    assert_eq!(response.results.len(), 5);

    let statuses: Vec<LookupStatus> = response.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            LookupStatus::Completed,
            LookupStatus::Completed,
            LookupStatus::Failed,
            LookupStatus::NotFound,
            LookupStatus::NotFound,
        ]
    );

    assert_eq!(response.with_data.len(), 1);
    assert_eq!(response.with_data[0].task_id, ids[0]);
    assert_eq!(response.with_data[0].cnpj.as_deref(), Some(VALID_CNPJ));

    let without: Vec<&str> = response.without_data.iter().map(|r| r.task_id.as_str()).collect();
    assert_eq!(without, vec![ids[1].as_str(), ids[2].as_str(), unknown.as_str(), "not-a-task"]);
}

#[tokio::test]
async fn test_persistence_policy() {
    // Disabled: nothing is written.
    let h = Harness::new();
    h.state.submission.submit(VALID_CNPJ).await.unwrap();
    h.drain(&h.worker("worker-1")).await;
    assert!(h.durable.is_empty());

    // Enabled but empty result: nothing is written.
    let h = Harness::with_persistence();
    h.extractor.script(VALID_CNPJ, Script::Empty);
    h.state.submission.submit(VALID_CNPJ).await.unwrap();
    h.drain(&h.worker("worker-1")).await;
    assert!(h.durable.is_empty());

    // Enabled but the lookup fails: nothing is written.
    let h = Harness::with_persistence();
    h.extractor.script(VALID_CNPJ, Script::Network);
    let submitted = h.state.submission.submit(VALID_CNPJ).await.unwrap();
    h.drain(&h.worker("worker-1")).await;
    let record = h.store.get(&submitted.task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert!(h.durable.is_empty());
    assert_eq!(h.durable.writes(), 0);

    // Enabled with data, two lookups of one subject: one row, latest wins.
    let h = Harness::with_persistence();
    h.state.submission.submit(VALID_CNPJ).await.unwrap();
    h.drain(&h.worker("worker-1")).await;
    let updated = RegistryRecord {
        legal_name: Some("EMPRESA RENOMEADA LTDA".to_string()),
        ..sample_record(VALID_CNPJ)
    };
    h.extractor.script(VALID_CNPJ, Script::Found(updated));
    h.state.submission.submit(VALID_CNPJ).await.unwrap();
    h.drain(&h.worker("worker-1")).await;

    assert_eq!(h.durable.len(), 1);
    assert_eq!(h.durable.writes(), 2);
    let row = h.durable.row(VALID_CNPJ).unwrap();
    assert_eq!(row.record.legal_name.as_deref(), Some("EMPRESA RENOMEADA LTDA"));
}

#[tokio::test]
async fn test_durable_write_failure_does_not_fail_task() {
    let h = Harness::with_persistence();
    h.durable.set_failing(true);
    let submitted = h.state.submission.submit(VALID_CNPJ).await.unwrap();

    let outcome = h.worker("worker-1").run_once(Duration::from_millis(50)).await;
    assert_eq!(
        outcome,
        Some(ProcessOutcome::Completed {
            has_data: true,
            persisted: PersistOutcome::Failed,
        })
    );
    let record = h.store.get(&submitted.task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert!(record.has_data);
}
