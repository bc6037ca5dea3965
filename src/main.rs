use std::sync::Arc;
use tokio::sync::watch;
use tokio::task;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reservation_core::{
    config::Config,
    database::Database,
    queue::KafkaFinalizeQueue,
    redis_client::RedisClient,
    services::FinalizeService,
    store::{PgBookingStore, PgEventStore, PgWaitlistStore},
    tokens::RedisTokenBucket,
    workers::{FinalizerWorker, HoldSweeper, Reconciler},
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting reservation core workers");

    let db = Database::new(&config.database.url, config.database.pool_size)
        .await
        .expect("Failed to connect to database");
    info!("Database connected");

    db.run_migrations()
        .await
        .expect("Failed to run migrations");

    let redis = RedisClient::new(&config.redis.url)
        .await
        .expect("Failed to connect to Redis");
    info!("Redis connected");

    let events = Arc::new(PgEventStore::new(db.pool.clone()));
    let bookings = Arc::new(PgBookingStore::new(db.pool.clone()));
    let waitlist = Arc::new(PgWaitlistStore::new(db.pool.clone()));
    let tokens = Arc::new(RedisTokenBucket::new(redis.clone()));
    let queue = Arc::new(
        KafkaFinalizeQueue::from_config(&config.kafka).expect("Failed to create Kafka producer"),
    );

    let finalize = Arc::new(FinalizeService::new(
        bookings.clone(),
        events.clone(),
        waitlist.clone(),
        tokens.clone(),
        queue.clone(),
        config.reservation.finalize_max_retries,
        config.reservation.finalize_backoff(),
    ));

    let reconciler = Arc::new(Reconciler::new(
        events.clone(),
        bookings.clone(),
        tokens.clone(),
        config.reservation.reconciler_interval(),
    ));

    // Прогрев бакетов: первый цикл реконсиляции до запуска воркеров.
    match reconciler.reconcile_once().await {
        Ok(fixes) => info!("Token buckets warmed up, {} fixed", fixes),
        Err(e) => error!("Startup reconciliation failed: {}", e),
    }

    let finalizer = FinalizerWorker::from_config(
        &config.kafka,
        finalize,
        config.reservation.worker_concurrency,
    )
    .expect("Failed to create Kafka consumer");

    let sweeper = HoldSweeper::new(
        bookings.clone(),
        tokens.clone(),
        config.reservation.hold_ttl(),
        config.reservation.sweeper_grace(),
        config.reservation.sweeper_interval(),
        config.reservation.sweeper_batch_size,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let finalizer_handle = task::spawn({
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = finalizer.run(shutdown).await {
                error!("finalizer worker exited with error: {}", e);
            }
        }
    });
    let sweeper_handle = task::spawn({
        let shutdown = shutdown_rx.clone();
        async move { sweeper.run(shutdown).await }
    });
    let reconciler_handle = task::spawn({
        let shutdown = shutdown_rx.clone();
        let reconciler = reconciler.clone();
        async move { reconciler.run(shutdown).await }
    });

    info!("Background workers running");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(finalizer_handle, sweeper_handle, reconciler_handle);
    info!("Workers stopped");
}
