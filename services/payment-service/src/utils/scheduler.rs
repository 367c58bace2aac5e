// /shop-platform/services/payment-service/src/utils/scheduler.rs

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
    models::OutboxStats,
    repository::{with_transaction, PaymentStore},
    utils::error::{AppError, AppResult},
};

// Scheduler metrics for monitoring
pub struct SchedulerMetrics {
    pub cleanup_runs: AtomicU64,
    pub cleanup_errors: AtomicU64,
    pub cleaned_events: AtomicU64,
    pub stats_runs: AtomicU64,
    pub last_cleanup: RwLock<Option<DateTime<Utc>>>,
    pub last_stats: RwLock<Option<OutboxStats>>,
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
            "outbox": *last_stats,
            "status": "running"
        })
    }
}

#[derive(Debug, Clone)]
pub struct HousekeepingConfig {
    pub cleanup_interval: Duration,
    pub stats_interval: Duration,
    pub outbox_retention: chrono::Duration,
}

fn scheduler_error(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::Configuration(format!("{}: {}", context, e))
}

/// Start housekeeping jobs untuk outbox. The returned scheduler must be shut
/// down by the caller.
pub async fn start_background_jobs(
    store: Arc<dyn PaymentStore>,
    config: HousekeepingConfig,
    metrics: Arc<SchedulerMetrics>,
) -> AppResult<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| scheduler_error("Failed to create scheduler", e))?;

    // Job 1: hapus outbox rows yang sudah SENT
    let cleanup_store = store.clone();
    let cleanup_metrics = metrics.clone();
    let retention = config.outbox_retention;
    let cleanup_job = Job::new_repeated_async(config.cleanup_interval, move |_uuid, _l| {
        let store = cleanup_store.clone();
        let metrics = cleanup_metrics.clone();
        Box::pin(async move {
            if let Err(e) = cleanup_outbox_job(store, retention, metrics).await {
                tracing::error!("Failed to cleanup outbox: {}", e);
            }
        })
    })
    .map_err(|e| scheduler_error("Failed to create cleanup job", e))?;

    scheduler
        .add(cleanup_job)
        .await
        .map_err(|e| scheduler_error("Failed to add cleanup job", e))?;

    // Job 2: log outbox statistics
    let stats_store = store.clone();
    let stats_metrics = metrics.clone();
    let stats_job = Job::new_repeated_async(config.stats_interval, move |_uuid, _l| {
        let store = stats_store.clone();
        let metrics = stats_metrics.clone();
        Box::pin(async move {
            if let Err(e) = outbox_stats_job(store, metrics).await {
                tracing::error!("Failed to log outbox stats: {}", e);
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

    tracing::info!("✅ Background jobs scheduler started");
    Ok(scheduler)
}

/// Background job: delete SENT outbox rows older than the retention window
pub async fn cleanup_outbox_job(
    store: Arc<dyn PaymentStore>,
    retention: chrono::Duration,
    metrics: Arc<SchedulerMetrics>,
) -> AppResult<u64> {
    let older_than = Utc::now() - retention;
    let result = with_transaction(store.as_ref(), move |tx| {
        Box::pin(async move { tx.cleanup_sent_events(older_than).await })
    })
    .await;

    match result {
        Ok(deleted) => {
            metrics.cleanup_runs.fetch_add(1, Ordering::Relaxed);
            metrics.cleaned_events.fetch_add(deleted, Ordering::Relaxed);
            *metrics.last_cleanup.write().await = Some(Utc::now());

            if deleted > 0 {
                tracing::info!("Cleaned up {} sent outbox events", deleted);
            } else {
                tracing::debug!("Tidak ada outbox events lama untuk dihapus");
            }
            Ok(deleted)
        }
        Err(e) => {
            metrics.cleanup_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Cleanup job failed: {}", e);
            Err(e)
        }
    }
}

/// Background job: log outbox counters
pub async fn outbox_stats_job(
    store: Arc<dyn PaymentStore>,
    metrics: Arc<SchedulerMetrics>,
) -> AppResult<OutboxStats> {
    let stats = with_transaction(store.as_ref(), |tx| {
        Box::pin(async move { tx.outbox_stats().await })
    })
    .await?;

    metrics.stats_runs.fetch_add(1, Ordering::Relaxed);
    *metrics.last_stats.write().await = Some(stats.clone());

    if stats.failed > 0 {
        tracing::warn!(
            pending = stats.pending,
            sent = stats.sent,
            failed = stats.failed,
            total = stats.total,
            "Outbox stats: failed events need attention"
        );
    } else {
        tracing::info!(
            pending = stats.pending,
            sent = stats.sent,
            failed = stats.failed,
            total = stats.total,
            "Outbox stats"
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::events::payment_outcome_event,
        models::{NewPayment, PaymentMethod, PaymentStatus, PaymentTransition},
        repository::MemoryPaymentStore,
    };
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    async fn seed_sent_event(store: &MemoryPaymentStore) {
        let mut tx = store.begin().await.unwrap();
        let payment = tx
            .create_payment(&NewPayment {
                order_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                amount: BigDecimal::from(1000),
                currency: "VND".to_string(),
                method: PaymentMethod::EWallet,
                provider: "MOMO".to_string(),
            })
            .await
            .unwrap();
        let processing = tx
            .update_payment_status(&PaymentTransition::new(&payment, PaymentStatus::Processing))
            .await
            .unwrap();
        let failed = tx
            .update_payment_status(&PaymentTransition::new(&processing, PaymentStatus::Failed))
            .await
            .unwrap();
        let event = tx
            .create_payment_event(&payment_outcome_event(&failed, PaymentStatus::Failed).unwrap())
            .await
            .unwrap();
        tx.mark_event_sent(event.id).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let store = MemoryPaymentStore::new();
        seed_sent_event(&store).await;
        let metrics = SchedulerMetrics::new();

        let kept = cleanup_outbox_job(Arc::new(store.clone()), chrono::Duration::days(7), metrics.clone())
            .await
            .unwrap();
        assert_eq!(kept, 0);
        assert_eq!(store.events().await.len(), 1);

        // zero retention removes everything already sent
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let deleted = cleanup_outbox_job(Arc::new(store.clone()), chrono::Duration::zero(), metrics.clone())
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.events().await.is_empty());
        assert_eq!(metrics.cleanup_runs.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.cleaned_events.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_stats_job_records_counts() {
        let store = MemoryPaymentStore::new();
        seed_sent_event(&store).await;
        let metrics = SchedulerMetrics::new();

        let stats = outbox_stats_job(Arc::new(store), metrics.clone()).await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.total, 1);

        let status = metrics.get_status().await;
        assert_eq!(status["stats_runs"], 1);
        assert_eq!(status["outbox"]["sent"], 1);
    }
}
