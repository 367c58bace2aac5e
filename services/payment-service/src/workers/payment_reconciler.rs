// /shop-platform/services/payment-service/src/workers/payment_reconciler.rs

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::Worker;
use crate::{
    core::coordinator::PaymentCoordinator,
    models::PaymentStatus,
    repository::with_transaction,
    utils::error::AppResult,
};

/// Closes PROCESSING payments whose IPN never arrived by asking the gateway
pub struct PaymentReconciler {
    coordinator: Arc<PaymentCoordinator>,
    threshold: chrono::Duration,
    batch_size: i64,
}

impl PaymentReconciler {
    pub fn new(coordinator: Arc<PaymentCoordinator>, threshold: chrono::Duration, batch_size: i64) -> Self {
        Self { coordinator, threshold, batch_size }
    }

    /// Returns how many payments got a terminal outcome applied
    pub async fn run_once(&self, cancel: &CancellationToken) -> AppResult<usize> {
        let older_than = Utc::now() - self.threshold;
        let batch_size = self.batch_size;
        let store = self.coordinator.store();
        let stale = with_transaction(store.as_ref(), move |tx| {
            Box::pin(async move {
                tx.list_pending_payments(PaymentStatus::Processing, older_than, batch_size)
                    .await
            })
        })
        .await?;

        let mut applied = 0;
        for payment in stale {
            if cancel.is_cancelled() {
                break;
            }
            match self.coordinator.reconcile_payment(&payment).await {
                Ok(Some(ack)) if ack.applied => {
                    applied += 1;
                    tracing::info!(
                        order_id = %payment.order_id,
                        payment_id = %payment.id,
                        status = %ack.status,
                        "Payment reconciled from gateway"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(payment_id = %payment.id, "Reconcile failed: {}", e);
                }
            }
        }
        Ok(applied)
    }
}

#[async_trait]
impl Worker for PaymentReconciler {
    fn name(&self) -> &'static str {
        "payment-reconciler"
    }

    async fn tick(&self, cancel: &CancellationToken) -> AppResult<()> {
        self.run_once(cancel).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MomoConfig,
        core::{
            coordinator::CoordinatorConfig,
            momo::MomoProvider,
            provider::{PaymentGateway, ProviderRegistry},
        },
        models::{InitiatePaymentRequest, PaymentMethod},
        repository::MemoryPaymentStore,
    };
    use bigdecimal::BigDecimal;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_only_stale_processing_payments_are_queried() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/create")
            .with_status(200)
            .with_body(r#"{"resultCode":0,"message":"ok","payUrl":"https://pay.test/x"}"#)
            .create_async()
            .await;
        let query = server
            .mock("POST", "/query")
            .with_status(200)
            .with_body(r#"{"resultCode":1006,"message":"Transaction denied by user.","transId":0}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = MomoProvider::new(MomoConfig {
            endpoint: format!("{}/create", server.url()),
            refund_endpoint: format!("{}/refund", server.url()),
            query_endpoint: format!("{}/query", server.url()),
            partner_code: "MOMO".to_string(),
            access_key: "access".to_string(),
            secret_key: "secret".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        let store = MemoryPaymentStore::new();
        let coordinator = Arc::new(PaymentCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(ProviderRegistry::new().with(PaymentGateway::Momo(provider))),
            CoordinatorConfig {
                currency: "VND".to_string(),
                default_provider: "MOMO".to_string(),
                api_gateway_url: "http://localhost:3003".to_string(),
                redirect_url: "http://localhost:3000/payment/result".to_string(),
            },
        ));

        let mut order_ids = Vec::new();
        for _ in 0..2 {
            let order_id = Uuid::new_v4();
            coordinator
                .initiate_payment(
                    Uuid::new_v4(),
                    InitiatePaymentRequest {
                        order_id,
                        method: PaymentMethod::EWallet,
                        amount: BigDecimal::from(5000),
                        provider: None,
                        order_info: None,
                    },
                )
                .await
                .unwrap();
            order_ids.push(order_id);
        }

        let stale = store
            .payments()
            .await
            .into_iter()
            .find(|p| p.order_id == order_ids[0])
            .unwrap();
        store
            .backdate_payment(stale.id, Utc::now() - chrono::Duration::minutes(30))
            .await;

        let reconciler = PaymentReconciler::new(coordinator, chrono::Duration::minutes(15), 100);
        let applied = reconciler.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(applied, 1);
        query.assert_async().await;

        let payments = store.payments().await;
        let status_of = |order_id: Uuid| payments.iter().find(|p| p.order_id == order_id).unwrap().status;
        assert_eq!(status_of(order_ids[0]), PaymentStatus::Failed);
        assert_eq!(status_of(order_ids[1]), PaymentStatus::Processing);
        assert_eq!(store.events().await.len(), 1);
    }
}
