// /shop-platform/services/order-service/src/main.rs

use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

use event_bus::{run_consumer, RedisStreamBus, ORDER_SERVICE_GROUP, PAYMENT_EVENTS_TOPIC};
use order_service::{
    api::routes,
    config::Config,
    core::{HttpPaymentStatusClient, InboxIngestor, PaymentStatusSource},
    models::InboxQueue,
    repository::{OrderStore, PgOrderStore},
    utils::{
        self,
        scheduler::{start_background_jobs, HousekeepingConfig, SchedulerMetrics},
    },
    workers::{spawn_worker, InboxProcessor, OrderReconciler},
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    utils::logger::init_logger();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout)
        .connect(&config.database.url)
        .await?;

    let pg_store = PgOrderStore::new(pool);
    pg_store.migrate().await?;
    info!("✅ Database berhasil terkoneksi");
    let store: Arc<dyn OrderStore> = Arc::new(pg_store);

    // Inbox consumer
    let bus = RedisStreamBus::connect(
        &config.bus.brokers,
        config.bus.partitions,
        config.bus.publish_timeout,
    )
    .await?;
    let consumer = bus
        .subscribe(
            PAYMENT_EVENTS_TOPIC,
            ORDER_SERVICE_GROUP,
            &config.bus.consumer_name,
            config.bus.assigned_partitions.clone(),
        )
        .await?;
    info!(
        "✅ Subscribed to {} as {} in {}",
        PAYMENT_EVENTS_TOPIC, config.bus.consumer_name, ORDER_SERVICE_GROUP
    );

    let cancel = CancellationToken::new();
    let ingestor = Arc::new(InboxIngestor::new(store.clone(), config.max_retry));
    let consumer_task = {
        let cancel = cancel.clone();
        let poll_interval = config.bus.poll_interval;
        tokio::spawn(async move {
            run_consumer(consumer, ingestor.as_ref(), cancel, poll_interval).await;
        })
    };

    // Row-processing workers
    let payment_status: Arc<dyn PaymentStatusSource> = Arc::new(HttpPaymentStatusClient::new(
        config.payment_service_url.clone(),
        config.payment_service_timeout,
    )?);
    let workers = vec![
        spawn_worker(
            Arc::new(InboxProcessor::new(store.clone(), InboxQueue::Fresh, config.batch_size)),
            config.scheduler.pending_interval,
            cancel.clone(),
        ),
        spawn_worker(
            Arc::new(InboxProcessor::new(store.clone(), InboxQueue::Retry, config.batch_size)),
            config.scheduler.retry_interval,
            cancel.clone(),
        ),
        spawn_worker(
            Arc::new(OrderReconciler::new(
                store.clone(),
                payment_status,
                config.reconcile_threshold,
                config.batch_size,
                config.max_retry,
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
            inbox_retention: config.inbox_retention,
        },
        scheduler_metrics.clone(),
    )
    .await?;

    let app_state = AppState {
        store,
        scheduler_metrics,
    };
    let app = routes::create_app(app_state, Duration::from_secs(30));

    let bind_address = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("🚀 Order Service berjalan di {}", bind_address);

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

    cancel.cancel();
    if let Err(e) = consumer_task.await {
        tracing::error!("Consumer task panicked: {}", e);
    }
    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!("Worker task panicked: {}", e);
        }
    }
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown failed: {}", e);
    }

    info!("Order Service stopped");
    Ok(())
}
