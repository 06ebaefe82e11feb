use sintegra_scraper::{
    config::AppConfig,
    db,
    services::{
        cache::{RedisBackend, ResultStore},
        extractor::Extractor,
        persistence::{PersistenceGate, PgDurableStore},
        queue::RedisQueue,
        sintegra::SintegraClient,
        worker::Worker,
    },
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!(
        worker_id = %config.worker_id,
        concurrency = config.worker_concurrency,
        "Starting scrape worker"
    );

    let backend = RedisBackend::new(&config.redis_url).expect("Failed to initialize result store");
    let store = ResultStore::new(Arc::new(backend), config.result_ttl());

    let gate = match (&config.database_url, config.persist_to_db) {
        (Some(database_url), true) => {
            tracing::info!("Connecting to PostgreSQL");
            let pool = db::init_pool(database_url)
                .await
                .expect("Failed to connect to database");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            PersistenceGate::enabled(Arc::new(PgDurableStore::new(pool)))
        }
        _ => PersistenceGate::disabled(),
    };

    tracing::info!(persist = gate.is_enabled(), "Persistence configured");

    let extractor: Arc<dyn Extractor> =
        Arc::new(SintegraClient::new(&config).expect("Failed to initialize SINTEGRA client"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::with_capacity(config.worker_concurrency);

    for n in 1..=config.worker_concurrency {
        let name = format!("{}-{}", config.worker_id, n);
        let queue = RedisQueue::new(config.queue_url(), &config.queue_name, &name)
            .expect("Failed to initialize work queue");

        match queue.recover().await {
            Ok(0) => {}
            Ok(moved) => tracing::warn!(worker = %name, moved, "Requeued envelopes left in flight"),
            Err(e) => tracing::error!(worker = %name, error = %e, "Failed to recover in-flight envelopes"),
        }

        let worker = Worker::new(
            name,
            store.clone(),
            Arc::new(queue),
            extractor.clone(),
            gate.clone(),
            config.extraction_deadline(),
        );
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { worker.run(shutdown).await }));
    }

    tracing::info!("Worker ready, waiting for tasks");

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Shutdown signal received, finishing in-flight tasks");
    shutdown_tx.send(true).ok();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }
    tracing::info!("Worker stopped");
}
