// /shop-platform/services/order-service/src/core/payment_client.rs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::utils::error::{AppError, AppResult};

/// Payment service view of an order's payment
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentStatusReport {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    /// PENDING, PROCESSING, SUCCESS, FAILED or REFUNDED
    pub status: String,
    pub provider_txn_id: Option<String>,
}

/// Where the reconciler asks for the payment outcome of a stuck order
#[async_trait]
pub trait PaymentStatusSource: Send + Sync {
    /// `None` when no payment exists for the order
    async fn payment_status(&self, order_id: Uuid) -> AppResult<Option<PaymentStatusReport>>;
}

/// Calls the payment service's internal status endpoint
#[derive(Clone)]
pub struct HttpPaymentStatusClient {
    client: Client,
    base_url: String,
}

impl HttpPaymentStatusClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn status_url(&self, order_id: Uuid) -> String {
        format!("{}/internal/payments/orders/{}/status", self.base_url, order_id)
    }
}

#[async_trait]
impl PaymentStatusSource for HttpPaymentStatusClient {
    async fn payment_status(&self, order_id: Uuid) -> AppResult<Option<PaymentStatusReport>> {
        let response = self.client.get(self.status_url(order_id)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<PaymentStatusReport>().await?)),
            status => Err(AppError::Transient(format!(
                "payment service answered {} for order {}",
                status, order_id
            ))),
        }
    }
}
