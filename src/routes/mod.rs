pub mod health;
pub mod metrics;
pub mod registry;
pub mod tasks;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

const BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Build the API router. `/metrics` is mounted only when a Prometheus
/// handle is supplied.
pub fn router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .route("/scrape", post(tasks::submit_scrape))
        .route("/scrape/batch", post(tasks::submit_scrape_batch))
        .route("/results/batch", get(tasks::get_results_batch))
        .route("/results/{task_id}", get(tasks::get_result))
        .route("/users/{cnpjs}", get(registry::get_registry_records))
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
}
