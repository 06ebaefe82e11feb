use std::collections::HashSet;

use crate::models::api::{BatchResultsResponse, BatchTaskItem, TaskRef, TaskStatusResponse};
use crate::models::task::{TaskId, TaskStatus};
use crate::services::cache::{ResultStore, StoreError};
use crate::services::submission::SubmissionService;

/// Fans submissions out over [`SubmissionService`] and reads task state
/// back from the result store, singly or in bulk.
#[derive(Clone)]
pub struct BatchCoordinator {
    submission: SubmissionService,
    store: ResultStore,
}

impl BatchCoordinator {
    pub fn new(submission: SubmissionService, store: ResultStore) -> Self {
        Self { submission, store }
    }

    /// Submit every subject independently, in order. A failed submission is
    /// reported on its own item and does not stop the rest.
    pub async fn submit_batch(&self, subjects: &[String]) -> Vec<BatchTaskItem> {
        let mut items = Vec::with_capacity(subjects.len());
        for subject in subjects {
            let item = match self.submission.submit(subject).await {
                Ok(submitted) => BatchTaskItem {
                    cnpj: submitted.subject,
                    task_id: submitted.task_id,
                    status: submitted.status,
                    error: None,
                },
                Err(e) => BatchTaskItem {
                    cnpj: subject.clone(),
                    task_id: e.task_id(),
                    status: TaskStatus::Failed,
                    error: Some(e.to_task_error()),
                },
            };
            items.push(item);
        }

        let failed = items.iter().filter(|i| i.error.is_some()).count();
        tracing::info!(total = items.len(), failed, "Batch submitted");
        items
    }

    /// Look up one task. Unknown, expired and malformed ids are all
    /// `not_found`.
    pub async fn get(&self, raw_id: &str) -> Result<TaskStatusResponse, StoreError> {
        let Ok(task_id) = raw_id.parse::<TaskId>() else {
            return Ok(TaskStatusResponse::not_found(raw_id));
        };
        Ok(match self.store.get(&task_id).await? {
            Some(record) => TaskStatusResponse::from_record(record),
            None => TaskStatusResponse::not_found(raw_id),
        })
    }

    /// Look up several tasks in one round trip. Duplicate ids are reported
    /// once, in first-seen order.
    pub async fn get_batch(&self, raw_ids: &[String]) -> Result<BatchResultsResponse, StoreError> {
        let mut seen = HashSet::new();
        let unique: Vec<&str> = raw_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .collect();

        let parsed: Vec<(&str, Option<TaskId>)> = unique
            .iter()
            .map(|raw| (*raw, raw.parse::<TaskId>().ok()))
            .collect();
        let lookup: Vec<TaskId> = parsed.iter().filter_map(|(_, id)| *id).collect();
        let mut found = self.store.get_many(&lookup).await?;

        let mut results = Vec::with_capacity(parsed.len());
        let mut with_data = Vec::new();
        let mut without_data = Vec::new();
        for (raw, task_id) in parsed {
            let response = match task_id.and_then(|id| found.remove(&id)) {
                Some(record) => TaskStatusResponse::from_record(record),
                None => TaskStatusResponse::not_found(raw),
            };
            let task_ref = TaskRef {
                task_id: response.task_id.clone(),
                cnpj: response.cnpj.clone(),
            };
            if response.has_data {
                with_data.push(task_ref);
            } else {
                without_data.push(task_ref);
            }
            results.push(response);
        }

        Ok(BatchResultsResponse {
            results,
            with_data,
            without_data,
        })
    }
}
