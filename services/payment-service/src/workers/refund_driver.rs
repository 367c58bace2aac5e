// /shop-platform/services/payment-service/src/workers/refund_driver.rs

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::Worker;
use crate::{
    core::coordinator::PaymentCoordinator,
    models::RefundStatus,
    repository::with_transaction,
    utils::error::AppResult,
};

/// Pushes REFUND_REQUESTED refunds through the gateway
pub struct RefundDriver {
    coordinator: Arc<PaymentCoordinator>,
    batch_size: i64,
}

impl RefundDriver {
    pub fn new(coordinator: Arc<PaymentCoordinator>, batch_size: i64) -> Self {
        Self { coordinator, batch_size }
    }

    /// Returns how many refunds reached a terminal state
    pub async fn run_once(&self, cancel: &CancellationToken) -> AppResult<usize> {
        let batch_size = self.batch_size;
        let store = self.coordinator.store();
        let requested = with_transaction(store.as_ref(), move |tx| {
            Box::pin(async move {
                tx.list_refunds_by_status(RefundStatus::RefundRequested, batch_size)
                    .await
            })
        })
        .await?;

        let mut finished = 0;
        for refund in requested {
            if cancel.is_cancelled() {
                break;
            }
            match self.coordinator.process_refund(refund.id).await {
                Ok(done) if done.status.is_terminal() => finished += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(refund_id = %refund.id, "Refund left for next tick: {}", e);
                }
            }
        }
        Ok(finished)
    }
}

#[async_trait]
impl Worker for RefundDriver {
    fn name(&self) -> &'static str {
        "refund-driver"
    }

    async fn tick(&self, cancel: &CancellationToken) -> AppResult<()> {
        let finished = self.run_once(cancel).await?;
        if finished > 0 {
            tracing::info!(finished, "Refund driver tick finished");
        }
        Ok(())
    }
}
