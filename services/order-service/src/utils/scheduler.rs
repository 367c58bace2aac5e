// /shop-platform/services/order-service/src/utils/scheduler.rs

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use crate::{
    models::InboxStats,
    repository::{with_transaction, OrderStore},
    utils::error::{AppError, AppResult},
};

// Counters untuk inbox housekeeping
pub struct SchedulerMetrics {
    pub cleanup_runs: AtomicU64,
    pub cleanup_errors: AtomicU64,
    pub cleaned_events: AtomicU64,
    pub stats_runs: AtomicU64,
    pub last_cleanup: RwLock<Option<DateTime<Utc>>>,
    pub last_stats: RwLock<Option<InboxStats>>,
}

impl SchedulerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cleanup_runs: AtomicU64::new(0),
            cleanup_errors: AtomicU64::new(0),
            cleaned_events: AtomicU64::new(0),
            stats_runs: AtomicU64::new(0),
            last_cleanup: RwLock::new(None),
            last_stats: RwLock::new(None),
        })
    }

    pub async fn get_status(&self) -> serde_json::Value {
        let last_cleanup = self.last_cleanup.read().await;
        let last_stats = self.last_stats.read().await;
        serde_json::json!({
            "cleanup_runs": self.cleanup_runs.load(Ordering::Relaxed),
            "cleanup_errors": self.cleanup_errors.load(Ordering::Relaxed),
            "cleaned_events": self.cleaned_events.load(Ordering::Relaxed),
            "stats_runs": self.stats_runs.load(Ordering::Relaxed),
            "last_cleanup": *last_cleanup,
            "inbox": *last_stats,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HousekeepingConfig {
    pub cleanup_interval: Duration,
    pub stats_interval: Duration,
    pub inbox_retention: chrono::Duration,
}

fn scheduler_error(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::Configuration(format!("{}: {}", context, e))
}

/// Start inbox cleanup and statistics jobs. Caller owns shutdown.
pub async fn start_background_jobs(
    store: Arc<dyn OrderStore>,
    config: HousekeepingConfig,
    metrics: Arc<SchedulerMetrics>,
) -> AppResult<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| scheduler_error("Failed to create scheduler", e))?;

    let cleanup_store = store.clone();
    let cleanup_metrics = metrics.clone();
    let retention = config.inbox_retention;
    let cleanup_job = Job::new_repeated_async(config.cleanup_interval, move |_uuid, _l| {
        let store = cleanup_store.clone();
        let metrics = cleanup_metrics.clone();
        Box::pin(async move {
            if let Err(e) = cleanup_inbox_job(store, retention, metrics).await {
                tracing::error!("Failed to cleanup inbox: {}", e);
            }
        })
    })
    .map_err(|e| scheduler_error("Failed to create cleanup job", e))?;

    scheduler
        .add(cleanup_job)
        .await
        .map_err(|e| scheduler_error("Failed to add cleanup job", e))?;

    let stats_store = store;
    let stats_metrics = metrics;
    let stats_job = Job::new_repeated_async(config.stats_interval, move |_uuid, _l| {
        let store = stats_store.clone();
        let metrics = stats_metrics.clone();
        Box::pin(async move {
            if let Err(e) = inbox_stats_job(store, metrics).await {
                tracing::error!("Failed to log inbox stats: {}", e);
            }
        })
    })
    .map_err(|e| scheduler_error("Failed to create stats job", e))?;

    scheduler
        .add(stats_job)
        .await
        .map_err(|e| scheduler_error("Failed to add stats job", e))?;

    scheduler
        .start()
        .await
        .map_err(|e| scheduler_error("Failed to start scheduler", e))?;

    tracing::info!("✅ Inbox housekeeping scheduler started");
    Ok(scheduler)
}

/// Delete PROCESSED inbox rows older than the retention window. FAILED rows
/// are kept for operators.
pub async fn cleanup_inbox_job(
    store: Arc<dyn OrderStore>,
    retention: chrono::Duration,
    metrics: Arc<SchedulerMetrics>,
) -> AppResult<u64> {
    let older_than = Utc::now() - retention;
    let result = with_transaction(store.as_ref(), move |tx| {
        Box::pin(async move { tx.cleanup_processed_inbox(older_than).await })
    })
    .await;

    match result {
        Ok(deleted) => {
            metrics.cleanup_runs.fetch_add(1, Ordering::Relaxed);
            metrics.cleaned_events.fetch_add(deleted, Ordering::Relaxed);
            *metrics.last_cleanup.write().await = Some(Utc::now());

            if deleted > 0 {
                tracing::info!("Cleaned up {} processed inbox events", deleted);
            } else {
                tracing::debug!("Tidak ada inbox events lama untuk dihapus");
            }
            Ok(deleted)
        }
        Err(e) => {
            metrics.cleanup_errors.fetch_add(1, Ordering::Relaxed);
            Err(e)
        }
    }
}

pub async fn inbox_stats_job(
    store: Arc<dyn OrderStore>,
    metrics: Arc<SchedulerMetrics>,
) -> AppResult<InboxStats> {
    let stats = with_transaction(store.as_ref(), |tx| {
        Box::pin(async move { tx.inbox_stats().await })
    })
    .await?;

    metrics.stats_runs.fetch_add(1, Ordering::Relaxed);
    *metrics.last_stats.write().await = Some(stats.clone());

    if stats.failed > 0 {
        tracing::warn!(
            pending = stats.pending,
            processed = stats.processed,
            failed = stats.failed,
            total = stats.total,
            "Inbox stats: failed events need attention"
        );
    } else {
        tracing::info!(
            pending = stats.pending,
            processed = stats.processed,
            failed = stats.failed,
            total = stats.total,
            "Inbox stats"
        );
    }
    Ok(stats)
}
