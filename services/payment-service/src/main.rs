// /shop-platform/services/payment-service/src/main.rs

use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

use event_bus::{EventProducer, RedisStreamBus};
use payment_service::{
    api::routes,
    config::Config,
    core::services::*,
    repository::{PaymentStore, PgPaymentStore},
    utils::{
        self,
        scheduler::{start_background_jobs, HousekeepingConfig, SchedulerMetrics},
    },
    workers::{spawn_worker, OutboxPublisher, PaymentReconciler, RefundDriver},
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    utils::logger::init_logger();

    let config = Config::from_env()?;

    // Setup database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout)
        .connect(&config.database.url)
        .await?;

    let pg_store = PgPaymentStore::new(pool);
    pg_store.migrate().await?;
    info!("✅ Database berhasil terkoneksi");
    let store: Arc<dyn PaymentStore> = Arc::new(pg_store);

    // Event bus producer
    let bus = RedisStreamBus::connect(
        &config.bus.brokers,
        config.bus.partitions,
        config.bus.publish_timeout,
    )
    .await?;
    info!("✅ Event bus berhasil terkoneksi ({} partitions)", bus.partitions());
    let producer: Arc<dyn EventProducer> = Arc::new(bus);

    // Gateways
    let providers = Arc::new(
        ProviderRegistry::new().with(PaymentGateway::Momo(MomoProvider::new(config.momo.clone())?)),
    );

    let coordinator = Arc::new(PaymentCoordinator::new(
        store.clone(),
        providers,
        CoordinatorConfig::from_config(&config),
    ));

    // Row-processing workers
    let cancel = CancellationToken::new();
    let workers = vec![
        spawn_worker(
            Arc::new(OutboxPublisher::new(
                store.clone(),
                producer,
                config.batch_size,
                config.max_retry,
            )),
            config.scheduler.pending_interval,
            cancel.clone(),
        ),
        spawn_worker(
            Arc::new(RefundDriver::new(coordinator.clone(), config.batch_size)),
            config.scheduler.retry_interval,
            cancel.clone(),
        ),
        spawn_worker(
            Arc::new(PaymentReconciler::new(
                coordinator.clone(),
                config.reconcile_threshold,
                config.batch_size,
            )),
            config.scheduler.reconcile_interval,
            cancel.clone(),
        ),
    ];

    // Housekeeping jobs
    let scheduler_metrics = SchedulerMetrics::new();
    let mut scheduler = start_background_jobs(
        store.clone(),
        HousekeepingConfig {
            cleanup_interval: config.scheduler.cleanup_interval,
            stats_interval: config.scheduler.stats_interval,
            outbox_retention: config.outbox_retention,
        },
        scheduler_metrics.clone(),
    )
    .await?;

    let app_state = AppState {
        coordinator,
        scheduler_metrics,
    };
    let app = routes::create_app(app_state, Duration::from_secs(30));

    let bind_address = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("🚀 Payment Service berjalan di {}", bind_address);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    // Let in-flight ticks finish their current row
    cancel.cancel();
    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!("Worker task panicked: {}", e);
        }
    }
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown failed: {}", e);
    }

    info!("Payment Service stopped");
    Ok(())
}
