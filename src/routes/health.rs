use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub result_store: ComponentHealth,
    pub queue: ComponentHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<ComponentHealth>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u64>,
}

impl ComponentHealth {
    fn from_check<E>(result: Result<(), E>, start: std::time::Instant) -> Self {
        match result {
            Ok(()) => ComponentHealth {
                status: "ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
                depth: None,
            },
            Err(_) => ComponentHealth {
                status: "error".to_string(),
                latency_ms: None,
                depth: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health: health check with dependency status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store_start = std::time::Instant::now();
    let store_check = ComponentHealth::from_check(state.store.health_check().await, store_start);

    let queue_start = std::time::Instant::now();
    let mut queue_check = ComponentHealth::from_check(state.queue.ping().await, queue_start);
    if queue_check.is_ok() {
        queue_check.depth = state.queue.depth().await.ok();
    }

    let db_check = match &state.durable {
        Some(durable) => {
            let db_start = std::time::Instant::now();
            Some(ComponentHealth::from_check(durable.ping().await, db_start))
        }
        None => None,
    };

    let all_healthy = store_check.is_ok()
        && queue_check.is_ok()
        && db_check.as_ref().map_or(true, ComponentHealth::is_ok);
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            result_store: store_check,
            queue: queue_check,
            database: db_check,
        },
    };

    (status_code, Json(response))
}
