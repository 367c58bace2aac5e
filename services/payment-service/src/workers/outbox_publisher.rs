// /shop-platform/services/payment-service/src/workers/outbox_publisher.rs

use async_trait::async_trait;
use event_bus::EventProducer;
use std::{collections::HashSet, sync::Arc};
use tokio_util::sync::CancellationToken;

use super::Worker;
use crate::{
    models::{OutboxStatus, PaymentEvent},
    repository::{with_transaction, PaymentStore},
    utils::error::{AppError, AppResult},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub sent: usize,
    /// Publish failed, row stays PENDING
    pub retried: usize,
    /// Publish failed for the last time, row is FAILED
    pub exhausted: usize,
    /// Skipped because an earlier event of the same order failed in this tick
    pub deferred: usize,
    /// Row status could not be written; it is picked up again next tick
    pub errors: usize,
}

/// Drains PENDING outbox rows onto the bus, keyed by order id
pub struct OutboxPublisher {
    store: Arc<dyn PaymentStore>,
    producer: Arc<dyn EventProducer>,
    batch_size: i64,
    max_retry: i32,
}

impl OutboxPublisher {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        producer: Arc<dyn EventProducer>,
        batch_size: i64,
        max_retry: i32,
    ) -> Self {
        Self { store, producer, batch_size, max_retry }
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> AppResult<PublishStats> {
        let batch_size = self.batch_size;
        let events = with_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.list_pending_payment_events(batch_size).await })
        })
        .await?;

        let mut stats = PublishStats::default();
        // orders whose earlier event failed; later ones wait so the order is kept
        let mut blocked = HashSet::new();

        for event in events {
            if cancel.is_cancelled() {
                tracing::info!("Outbox publisher cancelled mid-batch");
                break;
            }
            if blocked.contains(&event.order_id) {
                stats.deferred += 1;
                continue;
            }

            let key = event.order_id.to_string();
            match self
                .producer
                .publish(event.event_type.topic(), &key, &event.payload)
                .await
            {
                Ok(()) => {
                    let id = event.id;
                    let marked = with_transaction(self.store.as_ref(), move |tx| {
                        Box::pin(async move { tx.mark_event_sent(id).await })
                    })
                    .await;
                    if let Err(mark_err) = marked {
                        // published but still PENDING: it goes out again, later events wait
                        blocked.insert(event.order_id);
                        stats.errors += 1;
                        tracing::error!(
                            event_id = %event.event_id,
                            order_id = %event.order_id,
                            "Failed to mark outbox event sent: {}",
                            mark_err
                        );
                        continue;
                    }
                    stats.sent += 1;
                    tracing::debug!(
                        event_id = %event.event_id,
                        order_id = %event.order_id,
                        event_type = %event.event_type,
                        "Outbox event published"
                    );
                }
                Err(e) => {
                    blocked.insert(event.order_id);
                    let updated = match self.record_failure(&event).await {
                        Ok(updated) => updated,
                        Err(mark_err) => {
                            stats.errors += 1;
                            tracing::error!(
                                event_id = %event.event_id,
                                "Failed to record outbox failure ({}) after: {}",
                                mark_err,
                                e
                            );
                            continue;
                        }
                    };
                    if updated.status == OutboxStatus::Failed {
                        stats.exhausted += 1;
                        let err = AppError::RetryExhausted(format!(
                            "outbox event {} gave up after {} attempts: {}",
                            updated.event_id, updated.retry_count, e
                        ));
                        tracing::error!(order_id = %updated.order_id, "{}", err);
                    } else {
                        stats.retried += 1;
                        tracing::warn!(
                            event_id = %updated.event_id,
                            retry_count = updated.retry_count,
                            "Failed to publish outbox event: {}",
                            e
                        );
                    }
                }
            }
        }

        if stats != PublishStats::default() {
            tracing::info!(?stats, "Outbox publish tick finished");
        }
        Ok(stats)
    }

    async fn record_failure(&self, event: &PaymentEvent) -> AppResult<PaymentEvent> {
        let id = event.id;
        let max_retry = self.max_retry;
        with_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.mark_event_failed(id, max_retry).await })
        })
        .await
    }
}

#[async_trait]
impl Worker for OutboxPublisher {
    fn name(&self) -> &'static str {
        "outbox-publisher"
    }

    async fn tick(&self, cancel: &CancellationToken) -> AppResult<()> {
        self.run_once(cancel).await.map(|_| ())
    }
}
