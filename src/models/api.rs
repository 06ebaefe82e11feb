use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::registry::{RegistryRecord, StoredRegistryRecord};
use crate::models::task::{TaskError, TaskId, TaskRecord, TaskStatus};

/// Most CNPJs or task ids accepted by one batch request.
pub const MAX_BATCH_SIZE: usize = 100;

/// Request to look up one CNPJ.
#[derive(Debug, Deserialize, Validate)]
pub struct ScrapeRequest {
    #[garde(length(min = 1, max = 32))]
    pub cnpj: String,
}

/// Request to look up several CNPJs at once, at most 100 per request.
#[derive(Debug, Deserialize, Validate)]
pub struct BatchScrapeRequest {
    #[garde(length(min = 1, max = 100), inner(length(min = 1, max = 32)))]
    pub cnpjs: Vec<String>,
}

/// Response after submitting a task.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// Status of a task as seen by a poller. Expired and unknown tasks are
/// both `not_found`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    NotFound,
}

impl From<TaskStatus> for LookupStatus {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Queued => LookupStatus::Queued,
            TaskStatus::Processing => LookupStatus::Processing,
            TaskStatus::Completed => LookupStatus::Completed,
            TaskStatus::Failed => LookupStatus::Failed,
        }
    }
}

/// Response for querying a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: LookupStatus,
    pub cnpj: Option<String>,
    pub has_data: bool,
    pub result: Option<RegistryRecord>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<TaskError>,
}

impl TaskStatusResponse {
    pub fn from_record(record: TaskRecord) -> Self {
        Self {
            task_id: record.task_id.to_string(),
            status: record.status.into(),
            cnpj: Some(record.subject),
            has_data: record.has_data,
            result: record.result,
            error: record.error,
        }
    }

    pub fn not_found(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: LookupStatus::NotFound,
            cnpj: None,
            has_data: false,
            result: None,
            error: None,
        }
    }
}

/// Outcome of submitting one CNPJ within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTaskItem {
    pub cnpj: String,
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<TaskError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchSubmitResponse {
    pub tasks: Vec<BatchTaskItem>,
}

/// Entry of the with-data / without-data groupings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    pub task_id: String,
    pub cnpj: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResultsResponse {
    pub results: Vec<TaskStatusResponse>,
    pub with_data: Vec<TaskRef>,
    pub without_data: Vec<TaskRef>,
}

/// Durable lookup for several CNPJs.
#[derive(Debug, Serialize)]
pub struct RegistryBatchResponse {
    pub found: Vec<StoredRegistryRecord>,
    pub not_found: Vec<String>,
}
