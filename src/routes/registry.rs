use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::api::RegistryBatchResponse;
use crate::services::cnpj::normalize_cnpj;

/// GET /users/{cnpjs}: persisted registry records for one or more
/// comma-separated CNPJs.
pub async fn get_registry_records(
    State(state): State<AppState>,
    Path(cnpjs): Path<String>,
) -> Result<Response, ApiError> {
    let Some(durable) = state.durable.as_ref() else {
        return Err(ApiError::bad_request(
            "durable persistence is disabled (PERSIST_TO_DB=false)",
        ));
    };

    let raw_values: Vec<&str> = cnpjs
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    if raw_values.is_empty() {
        return Err(ApiError::bad_request("provide at least one CNPJ"));
    }

    let mut subjects: Vec<String> = Vec::with_capacity(raw_values.len());
    for raw in &raw_values {
        let subject = normalize_cnpj(raw)?;
        if !subjects.contains(&subject) {
            subjects.push(subject);
        }
    }

    let mut rows = durable.find_many(&subjects).await?;

    if raw_values.len() == 1 {
        let subject = &subjects[0];
        return match rows.pop() {
            Some(row) => {
                tracing::info!(subject = %subject, "Registry record found");
                Ok(Json(row).into_response())
            }
            None => {
                tracing::info!(subject = %subject, "Registry record not found");
                Err(ApiError::NotFound(format!("no record for CNPJ {subject}")))
            }
        };
    }

    let mut found = Vec::with_capacity(subjects.len());
    let mut not_found = Vec::new();
    for subject in subjects {
        match rows.iter().position(|row| row.subject == subject) {
            Some(index) => found.push(rows.swap_remove(index)),
            None => not_found.push(subject),
        }
    }
    tracing::info!(found = found.len(), not_found = not_found.len(), "Registry lookup");

    Ok(Json(RegistryBatchResponse { found, not_found }).into_response())
}
