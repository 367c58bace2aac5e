// /shop-platform/e2e/src/lib.rs

//! In-process wiring between the two services, used by the scenario tests.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use order_service::{
    core::{PaymentStatusReport, PaymentStatusSource},
    utils::error::{AppError as OrderError, AppResult as OrderResult},
};
use payment_service::{
    core::coordinator::PaymentCoordinator,
    utils::error::{AppError as PaymentError, ErrorKind},
};

/// Order reconciler's view of payments, answered by the coordinator directly
/// instead of over HTTP.
pub struct CoordinatorStatusSource {
    coordinator: Arc<PaymentCoordinator>,
}

impl CoordinatorStatusSource {
    pub fn new(coordinator: Arc<PaymentCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl PaymentStatusSource for CoordinatorStatusSource {
    async fn payment_status(&self, order_id: Uuid) -> OrderResult<Option<PaymentStatusReport>> {
        match self.coordinator.payment_status_for_order(order_id).await {
            Ok(status) => Ok(Some(PaymentStatusReport {
                order_id: status.order_id,
                payment_id: status.payment_id,
                status: status.status.as_str().to_string(),
                provider_txn_id: status.provider_txn_id,
            })),
            Err(PaymentError::NotFound(_)) => Ok(None),
            Err(e) if e.kind() == ErrorKind::Transient => Err(OrderError::Transient(e.to_string())),
            Err(e) => {
                tracing::warn!(order_id = %order_id, "Payment status lookup failed: {}", e);
                Err(OrderError::Internal(e.to_string()))
            }
        }
    }
}
