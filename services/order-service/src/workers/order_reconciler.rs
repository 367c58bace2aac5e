// /shop-platform/services/order-service/src/workers/order_reconciler.rs

use async_trait::async_trait;
use chrono::Utc;
use event_bus::{EventEnvelope, EventType};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::Worker;
use crate::{
    core::{PaymentStatusReport, PaymentStatusSource},
    models::{InboxInsert, NewInboxEvent, Order, OrderStatus},
    repository::{with_transaction, OrderStore},
    utils::error::AppResult,
};

pub const RECONCILER_SOURCE: &str = "order-reconciler";

/// sha256("{order_id}:{status}:reconcile") in hex. Re-running the reconciler
/// for the same outcome always lands on the same inbox row.
pub fn reconcile_event_id(order_id: Uuid, status: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}:reconcile", order_id, status).as_bytes());
    hex::encode(digest)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub checked: usize,
    pub synthesized: usize,
    /// Synthesized event already in the inbox
    pub duplicates: usize,
    /// Payment missing or still in flight
    pub unresolved: usize,
    pub errors: usize,
}

/// Rescues orders stuck in PENDING_PAYMENT whose payment event never arrived
pub struct OrderReconciler {
    store: Arc<dyn OrderStore>,
    source: Arc<dyn PaymentStatusSource>,
    threshold: chrono::Duration,
    batch_size: i64,
    max_retry: i32,
}

impl OrderReconciler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        source: Arc<dyn PaymentStatusSource>,
        threshold: chrono::Duration,
        batch_size: i64,
        max_retry: i32,
    ) -> Self {
        Self { store, source, threshold, batch_size, max_retry }
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> AppResult<ReconcileStats> {
        let older_than = Utc::now() - self.threshold;
        let batch_size = self.batch_size;
        let orders = with_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move {
                tx.list_stale_orders(OrderStatus::PendingPayment, older_than, batch_size)
                    .await
            })
        })
        .await?;

        let mut stats = ReconcileStats::default();
        for order in orders {
            if cancel.is_cancelled() {
                tracing::info!("Order reconciler cancelled mid-batch");
                break;
            }
            stats.checked += 1;

            match self.reconcile_order(&order).await {
                Ok(Some(InboxInsert::Inserted(_))) => stats.synthesized += 1,
                Ok(Some(InboxInsert::Duplicate(_))) => stats.duplicates += 1,
                Ok(None) => stats.unresolved += 1,
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(order_id = %order.id, "Failed to reconcile order: {}", e);
                }
            }
        }

        if stats.checked > 0 {
            tracing::info!(?stats, "Order reconcile tick finished");
        }
        Ok(stats)
    }

    async fn reconcile_order(&self, order: &Order) -> AppResult<Option<InboxInsert>> {
        let Some(report) = self.source.payment_status(order.id).await? else {
            tracing::debug!(order_id = %order.id, "No payment found for stale order");
            return Ok(None);
        };

        let Some(event) = self.synthesize(&report)? else {
            tracing::debug!(order_id = %order.id, status = %report.status, "Payment not terminal yet");
            return Ok(None);
        };

        let inserted = with_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.insert_inbox_event(&event).await })
        })
        .await?;

        if let InboxInsert::Inserted(row) = &inserted {
            tracing::info!(
                order_id = %order.id,
                event_id = %row.event_id,
                event_type = %row.event_type,
                "Synthesized inbox event for stale order"
            );
        }
        Ok(Some(inserted))
    }

    fn synthesize(&self, report: &PaymentStatusReport) -> AppResult<Option<NewInboxEvent>> {
        // a refunded payment had succeeded first
        let (event_type, outcome) = match report.status.to_ascii_uppercase().as_str() {
            "SUCCESS" | "REFUNDED" => (EventType::PaymentSuccess, "SUCCESS"),
            "FAILED" => (EventType::PaymentFailed, "FAILED"),
            _ => return Ok(None),
        };

        let envelope = EventEnvelope::new(
            reconcile_event_id(report.order_id, outcome),
            event_type,
            report.order_id,
            report.payment_id,
            serde_json::json!({
                "status": outcome,
                "provider_txn_id": report.provider_txn_id,
                "reconciled": true,
            }),
        );

        Ok(Some(NewInboxEvent {
            payload: envelope.to_bytes()?,
            event_id: envelope.event_id,
            event_type,
            source_service: RECONCILER_SOURCE.to_string(),
            max_retry: self.max_retry,
        }))
    }
}

#[async_trait]
impl Worker for OrderReconciler {
    fn name(&self) -> &'static str {
        "order-reconciler"
    }

    async fn tick(&self, cancel: &CancellationToken) -> AppResult<()> {
        self.run_once(cancel).await.map(|_| ())
    }
}
