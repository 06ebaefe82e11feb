use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::models::registry::RegistryRecord;

/// Opaque handle returned to callers. Never derived from the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Lifecycle of a scrape task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Classification of why a task ended up `failed`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Network,
    Parse,
    /// The envelope never reached the queue.
    Publish,
    /// The result store rejected the initial write.
    Store,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// State of one task as held in the result store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub subject: String,
    /// Present only for `completed` tasks whose lookup returned data.
    pub result: Option<RegistryRecord>,
    #[serde(default)]
    pub has_data: bool,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("task {task_id} is already {status}")]
pub struct TransitionError {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

impl TaskRecord {
    pub fn queued(task_id: TaskId, subject: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: TaskStatus::Queued,
            subject: subject.into(),
            result: None,
            has_data: false,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn start_processing(&self) -> Result<Self, TransitionError> {
        self.transition(TaskStatus::Processing, None, None)
    }

    /// Finish the task with the extracted record. An empty record
    /// completes the task without data.
    pub fn complete(&self, record: RegistryRecord) -> Result<Self, TransitionError> {
        let result = record.has_data().then_some(record);
        self.transition(TaskStatus::Completed, result, None)
    }

    pub fn fail(&self, error: TaskError) -> Result<Self, TransitionError> {
        self.transition(TaskStatus::Failed, None, Some(error))
    }

    fn transition(
        &self,
        status: TaskStatus,
        result: Option<RegistryRecord>,
        error: Option<TaskError>,
    ) -> Result<Self, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError {
                task_id: self.task_id,
                status: self.status,
            });
        }
        Ok(Self {
            task_id: self.task_id,
            status,
            subject: self.subject.clone(),
            has_data: result.is_some(),
            result,
            error,
            created_at: self.created_at,
            updated_at: Utc::now(),
        })
    }
}

/// Message carried by the work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: TaskId,
    pub subject: String,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn for_record(record: &TaskRecord) -> Self {
        Self {
            task_id: record.task_id,
            subject: record.subject.clone(),
            enqueued_at: Utc::now(),
        }
    }
}
