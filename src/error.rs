//! HTTP error type and the JSON error payload.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::cache::StoreError;
use crate::services::cnpj::CnpjError;
use crate::services::persistence::PersistError;
use crate::services::submission::SubmitError;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    /// Stable error code identifier.
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{0}")]
    NotFound(String),

    /// The task was recorded but its envelope never reached the queue.
    #[error("{message}")]
    QueuePublishFailed { message: String, task_id: String },

    #[error("{0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
            details: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::QueuePublishFailed { .. } | ApiError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest { .. } => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::QueuePublishFailed { .. } => "QUEUE_PUBLISH_FAILED",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    fn to_payload(&self) -> ErrorResponse {
        let details = match self {
            ApiError::BadRequest { details, .. } => details.clone(),
            ApiError::QueuePublishFailed { task_id, .. } => {
                Some(serde_json::json!({ "task_id": task_id }))
            }
            _ => None,
        };
        ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                details,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        (status, Json(self.to_payload())).into_response()
    }
}

impl From<CnpjError> for ApiError {
    fn from(err: CnpjError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        let fields: Vec<serde_json::Value> = report
            .iter()
            .map(|(path, error)| {
                serde_json::json!({ "field": path.to_string(), "message": error.to_string() })
            })
            .collect();
        ApiError::BadRequest {
            message: "request validation failed".to_string(),
            details: Some(serde_json::Value::Array(fields)),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::ServiceUnavailable(err.to_string())
    }
}

impl From<PersistError> for ApiError {
    fn from(err: PersistError) -> Self {
        ApiError::ServiceUnavailable(err.to_string())
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Publish { task_id, .. } => ApiError::QueuePublishFailed {
                message: err.to_string(),
                task_id: task_id.to_string(),
            },
            SubmitError::Store { .. } => ApiError::ServiceUnavailable(err.to_string()),
        }
    }
}
