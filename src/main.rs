use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sintegra_scraper::{
    app_state::AppState,
    config::AppConfig,
    db, routes,
    services::{
        cache::{RedisBackend, ResultStore},
        persistence::{DurableStore, PgDurableStore},
        queue::{QueueChannel, RedisQueue},
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing sintegra-scraper API");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("tasks_submitted_total", "Tasks recorded and published");
    metrics::describe_counter!(
        "tasks_publish_failed_total",
        "Tasks whose envelope could not be published"
    );

    tracing::info!("Connecting to Redis result store");
    let backend = RedisBackend::new(&config.redis_url).expect("Failed to initialize result store");
    let store = ResultStore::new(Arc::new(backend), config.result_ttl());

    tracing::info!(queue = %config.queue_name, "Connecting to work queue");
    let queue: Arc<dyn QueueChannel> = Arc::new(
        RedisQueue::new(config.queue_url(), &config.queue_name, "api")
            .expect("Failed to initialize work queue"),
    );

    let durable: Option<Arc<dyn DurableStore>> = match (&config.database_url, config.persist_to_db) {
        (Some(database_url), true) => {
            tracing::info!("Connecting to PostgreSQL database");
            let pool = db::init_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Running database migrations");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            Some(Arc::new(PgDurableStore::new(pool)) as Arc<dyn DurableStore>)
        }
        _ => None,
    };

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(store, queue, durable);
    let app = routes::router(state, Some(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
