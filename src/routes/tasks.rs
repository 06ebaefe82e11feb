use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::api::{
    BatchScrapeRequest, BatchSubmitResponse, LookupStatus, ScrapeRequest, SubmitResponse,
    MAX_BATCH_SIZE,
};
use crate::services::cnpj::normalize_cnpj;

/// POST /scrape: queue a lookup for one CNPJ.
pub async fn submit_scrape(
    State(state): State<AppState>,
    payload: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(request) = payload?;
    request.validate()?;
    let subject = normalize_cnpj(&request.cnpj)?;

    let submitted = state.submission.submit(&subject).await?;
    Ok(Json(SubmitResponse {
        task_id: submitted.task_id,
        status: submitted.status,
    }))
}

/// POST /scrape/batch: queue one lookup per CNPJ.
///
/// Every CNPJ is validated before anything is submitted; one bad entry
/// rejects the request.
pub async fn submit_scrape_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchScrapeRequest>, JsonRejection>,
) -> Result<Json<BatchSubmitResponse>, ApiError> {
    let Json(request) = payload?;
    request.validate()?;

    let subjects = request
        .cnpjs
        .iter()
        .map(|raw| {
            normalize_cnpj(raw).map_err(|e| ApiError::BadRequest {
                message: e.to_string(),
                details: Some(serde_json::json!({ "cnpj": raw })),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let tasks = state.batch.submit_batch(&subjects).await;
    Ok(Json(BatchSubmitResponse { tasks }))
}

/// GET /results/{task_id}: status and result of one task. A comma-separated
/// list is answered like `/results/batch`.
pub async fn get_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    if task_id.contains(',') {
        let ids = split_ids(&task_id);
        return batch_lookup(&state, &ids).await;
    }

    let response = state.batch.get(&task_id).await?;
    if response.status == LookupStatus::NotFound {
        return Err(ApiError::NotFound(format!("task {task_id} not found")));
    }
    Ok(Json(response).into_response())
}

/// GET /results/batch: status of several tasks, grouped by whether they
/// produced data.
///
/// Accepts `task_ids` repeated, comma-separated, or both.
pub async fn get_results_batch(
    State(state): State<AppState>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(pairs) = query?;
    let ids = task_ids_from_query(&pairs);
    batch_lookup(&state, &ids).await
}

async fn batch_lookup(state: &AppState, ids: &[String]) -> Result<Response, ApiError> {
    if ids.is_empty() {
        return Err(ApiError::bad_request("provide at least one task_id"));
    }
    if ids.len() > MAX_BATCH_SIZE {
        return Err(ApiError::bad_request(format!(
            "at most {MAX_BATCH_SIZE} task ids per request, got {}",
            ids.len()
        )));
    }
    let response = state.batch.get_batch(ids).await?;
    Ok(Json(response).into_response())
}

fn task_ids_from_query(pairs: &[(String, String)]) -> Vec<String> {
    pairs
        .iter()
        .filter(|(key, _)| key == "task_ids")
        .flat_map(|(_, value)| split_ids(value))
        .collect()
}

fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
