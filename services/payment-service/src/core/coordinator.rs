// /shop-platform/services/payment-service/src/core/coordinator.rs

use bigdecimal::{BigDecimal, Zero};
use event_bus::EventType;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    events::{payment_outcome_event, refund_event},
    provider::{PaymentData, ProviderRegistry, RefundData},
};
use crate::{
    config::Config,
    models::{
        to_minor_units, InitiatePaymentRequest, InitiatePaymentResponse, IpnAck, NewPayment,
        NewPaymentEvent, NewRefund, OrderPaymentStatus, Payment, PaymentStatus, PaymentTransition,
        Refund, RefundRequest, RefundStatus,
    },
    repository::{with_transaction, PaymentStore, PaymentTx},
    utils::error::{AppError, AppResult, ErrorKind},
};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub currency: String,
    pub default_provider: String,
    pub api_gateway_url: String,
    pub redirect_url: String,
}

impl CoordinatorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            currency: config.currency.clone(),
            default_provider: super::provider::MOMO.to_string(),
            api_gateway_url: config.api_gateway_url.clone(),
            redirect_url: config.redirect_url(),
        }
    }

    fn ipn_url(&self, provider: &str) -> String {
        crate::config::ipn_url(&self.api_gateway_url, provider)
    }
}

/// What an incoming outcome does to a payment in its current state
#[derive(Debug, PartialEq, Eq)]
enum Decision {
    Apply,
    AlreadyApplied,
    Reject,
}

fn decide(current: PaymentStatus, incoming: PaymentStatus) -> Decision {
    use PaymentStatus::*;
    match (current, incoming) {
        (Processing, Success) | (Processing, Failed) => Decision::Apply,
        // a refunded payment was a successful one
        (Success, Success) | (Refunded, Success) | (Failed, Failed) => Decision::AlreadyApplied,
        _ => Decision::Reject,
    }
}

/// Insert an outbox row; a duplicate event id means the event already exists
async fn insert_event(tx: &mut dyn PaymentTx, event: &NewPaymentEvent) -> AppResult<()> {
    match tx.create_payment_event(event).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::IntegrityViolation => {
            tracing::warn!(event_id = %event.event_id, "Outbox event already recorded: {}", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Payment state machine. Every transition that downstream services care
/// about writes its outbox row in the same transaction as the status change,
/// and no gateway call is made while a transaction is open.
pub struct PaymentCoordinator {
    store: Arc<dyn PaymentStore>,
    providers: Arc<ProviderRegistry>,
    config: CoordinatorConfig,
}

impl PaymentCoordinator {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        providers: Arc<ProviderRegistry>,
        config: CoordinatorConfig,
    ) -> Self {
        Self { store, providers, config }
    }

    pub fn store(&self) -> Arc<dyn PaymentStore> {
        self.store.clone()
    }

    // ========================= INITIATE =========================

    pub async fn initiate_payment(
        &self,
        user_id: Uuid,
        req: InitiatePaymentRequest,
    ) -> AppResult<InitiatePaymentResponse> {
        let provider_name = req
            .provider
            .clone()
            .unwrap_or_else(|| self.config.default_provider.clone());
        let gateway = self.providers.get(&provider_name)?;
        let amount = to_minor_units(&req.amount)?;

        let mut tx = self.store.begin().await?;
        if let Some(existing) = tx.get_payment_by_order_id(req.order_id).await? {
            if !existing.status.is_terminal() {
                tx.commit().await?;
                tracing::info!(
                    order_id = %req.order_id,
                    payment_id = %existing.id,
                    "Payment already exists for order, returning it"
                );
                return Ok(InitiatePaymentResponse {
                    payment_id: existing.id,
                    pay_url: existing.pay_url,
                    status: existing.status,
                });
            }
        }

        let new = NewPayment {
            order_id: req.order_id,
            user_id,
            amount: req.amount.clone(),
            currency: self.config.currency.clone(),
            method: req.method,
            provider: gateway.name().to_string(),
        };
        let payment = match tx.create_payment(&new).await {
            Ok(payment) => payment,
            Err(e) if e.kind() == ErrorKind::IntegrityViolation => {
                // lost a race with a concurrent initiate for the same order
                drop(tx);
                return self.current_payment(req.order_id).await;
            }
            Err(e) => return Err(e),
        };
        tx.commit().await?;

        let data = PaymentData {
            order_id: req.order_id,
            amount,
            order_info: req
                .order_info
                .clone()
                .unwrap_or_else(|| format!("Thanh toan don hang {}", req.order_id)),
            redirect_url: self.config.redirect_url.clone(),
            ipn_url: self.config.ipn_url(gateway.name()),
        };

        match gateway.create_payment(&data).await {
            Ok(created) => {
                let mut transition = PaymentTransition::new(&payment, PaymentStatus::Processing);
                transition.pay_url = Some(created.pay_url);
                transition.provider_order_ref = Some(created.provider_order_ref);

                let processing = with_transaction(self.store.as_ref(), move |tx| {
                    Box::pin(async move { tx.update_payment_status(&transition).await })
                })
                .await?;

                tracing::info!(
                    order_id = %processing.order_id,
                    payment_id = %processing.id,
                    "Payment created at gateway"
                );

                Ok(InitiatePaymentResponse {
                    payment_id: processing.id,
                    pay_url: processing.pay_url,
                    status: processing.status,
                })
            }
            Err(provider_error) => {
                tracing::warn!(
                    order_id = %payment.order_id,
                    payment_id = %payment.id,
                    "Gateway refused payment creation: {}",
                    provider_error
                );

                with_transaction(self.store.as_ref(), move |tx| {
                    Box::pin(async move {
                        let failed = tx
                            .update_payment_status(&PaymentTransition::new(&payment, PaymentStatus::Failed))
                            .await?;
                        insert_event(tx, &payment_outcome_event(&failed, PaymentStatus::Failed)?).await?;
                        Ok(())
                    })
                })
                .await?;

                Err(provider_error)
            }
        }
    }

    async fn current_payment(&self, order_id: Uuid) -> AppResult<InitiatePaymentResponse> {
        let mut tx = self.store.begin().await?;
        let payment = tx
            .get_payment_by_order_id(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no payment for order {}", order_id)))?;
        tx.commit().await?;

        Ok(InitiatePaymentResponse {
            payment_id: payment.id,
            pay_url: payment.pay_url,
            status: payment.status,
        })
    }

    // ========================= IPN =========================

    /// Verify a gateway callback and apply it. Replays are no-ops.
    pub async fn handle_ipn(&self, provider: &str, body: &[u8]) -> AppResult<IpnAck> {
        let gateway = self.providers.get(provider)?;
        let outcome = gateway.handle_ipn(body)?;

        self.apply_outcome(
            outcome.order_id,
            &outcome.provider_order_ref,
            outcome.status,
            Some(outcome.provider_txn_id),
            Some(outcome.amount),
        )
        .await
    }

    /// Shared by IPN handling and reconciliation. The outcome only applies to
    /// the payment attempt whose gateway reference it carries; a callback for
    /// an earlier attempt of the same order is acknowledged and ignored.
    async fn apply_outcome(
        &self,
        order_id: Uuid,
        provider_order_ref: &str,
        incoming: PaymentStatus,
        provider_txn_id: Option<String>,
        amount: Option<i64>,
    ) -> AppResult<IpnAck> {
        let mut tx = self.store.begin().await?;
        let payment = tx
            .get_payment_by_order_id(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no payment for order {}", order_id)))?;

        if payment.provider_order_ref.as_deref() != Some(provider_order_ref) {
            tracing::warn!(
                %order_id,
                payment_id = %payment.id,
                received_ref = %provider_order_ref,
                current_ref = ?payment.provider_order_ref,
                "Outcome for a superseded payment attempt, ignoring"
            );
            return Ok(IpnAck {
                payment_id: payment.id,
                status: payment.status,
                applied: false,
            });
        }

        if let Some(amount) = amount {
            let expected = to_minor_units(&payment.amount)?;
            if expected != amount {
                tracing::warn!(%order_id, expected, received = amount, "IPN amount mismatch");
                return Err(AppError::PreconditionFailed(format!(
                    "amount {} does not match payment amount {}",
                    amount, expected
                )));
            }
        }

        match decide(payment.status, incoming) {
            Decision::AlreadyApplied => {
                tracing::info!(
                    %order_id,
                    payment_id = %payment.id,
                    status = %payment.status,
                    "Outcome already applied, ignoring"
                );
                return Ok(IpnAck {
                    payment_id: payment.id,
                    status: payment.status,
                    applied: false,
                });
            }
            Decision::Reject => {
                return Err(AppError::PreconditionFailed(format!(
                    "payment {} is {} and cannot become {}",
                    payment.id, payment.status, incoming
                )));
            }
            Decision::Apply => {}
        }

        let mut transition = PaymentTransition::new(&payment, incoming);
        transition.provider_txn_id = provider_txn_id;
        let updated = tx.update_payment_status(&transition).await?;
        insert_event(tx.as_mut(), &payment_outcome_event(&updated, incoming)?).await?;
        tx.commit().await?;

        tracing::info!(
            %order_id,
            payment_id = %updated.id,
            status = %updated.status,
            "Payment outcome applied"
        );

        Ok(IpnAck {
            payment_id: updated.id,
            status: updated.status,
            applied: true,
        })
    }

    // ========================= REFUND =========================

    pub async fn request_refund(&self, payment_id: Uuid, req: RefundRequest) -> AppResult<Refund> {
        let mut tx = self.store.begin().await?;
        let payment = tx
            .get_payment_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment {} not found", payment_id)))?;

        if payment.status != PaymentStatus::Success {
            return Err(AppError::PreconditionFailed(format!(
                "payment {} is {}, only SUCCESS payments can be refunded",
                payment.id, payment.status
            )));
        }

        if let Some(existing) = tx.get_refund_by_payment_id(payment.id).await? {
            if !existing.status.is_terminal() {
                return Err(AppError::PreconditionFailed(format!(
                    "refund {} is already in flight",
                    existing.id
                )));
            }
        }

        let amount = req.amount.unwrap_or_else(|| payment.amount.clone());
        let already_refunded = tx.sum_completed_refunds(payment.id).await?;
        if amount <= BigDecimal::zero() || &already_refunded + &amount > payment.amount {
            return Err(AppError::PreconditionFailed(format!(
                "refund amount {} exceeds refundable amount",
                amount
            )));
        }

        let refund = tx
            .create_refund(&NewRefund {
                payment_id: payment.id,
                order_id: payment.order_id,
                amount,
                reason: req.reason,
            })
            .await?;
        insert_event(tx.as_mut(), &refund_event(&refund, EventType::RefundRequested)?).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %refund.order_id,
            payment_id = %refund.payment_id,
            refund_id = %refund.id,
            "Refund requested"
        );
        Ok(refund)
    }

    /// Drive one REFUND_REQUESTED refund through the gateway. Transient gateway
    /// errors leave it for the next tick; a rejection marks it FAILED.
    pub async fn process_refund(&self, refund_id: Uuid) -> AppResult<Refund> {
        let mut tx = self.store.begin().await?;
        let refund = tx
            .get_refund_by_id(refund_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("refund {} not found", refund_id)))?;
        if refund.status != RefundStatus::RefundRequested {
            return Ok(refund);
        }
        let payment = tx
            .get_payment_by_id(refund.payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment {} not found", refund.payment_id)))?;
        tx.commit().await?;

        let gateway = self.providers.get(&payment.provider)?;
        let data = RefundData {
            order_ref: payment
                .provider_order_ref
                .clone()
                .unwrap_or_else(|| payment.order_id.to_string()),
            amount: to_minor_units(&refund.amount)?,
            provider_txn_id: payment.provider_txn_id.clone().unwrap_or_default(),
            reason: refund.reason.clone().unwrap_or_default(),
        };

        match gateway.refund(&data).await {
            Ok(result) => self.complete_refund(&payment, refund.id, &result.provider_refund_id).await,
            Err(e) if e.is_transient() => {
                tracing::warn!(refund_id = %refund.id, "Refund attempt failed, will retry: {}", e);
                Err(e)
            }
            Err(e) => {
                tracing::error!(refund_id = %refund.id, "Gateway rejected refund: {}", e);
                let refund_id = refund.id;
                with_transaction(self.store.as_ref(), move |tx| {
                    Box::pin(async move {
                        tx.update_refund_status(refund_id, RefundStatus::Failed, None).await
                    })
                })
                .await
            }
        }
    }

    async fn complete_refund(
        &self,
        payment: &Payment,
        refund_id: Uuid,
        provider_refund_id: &str,
    ) -> AppResult<Refund> {
        let mut tx = self.store.begin().await?;
        // payment row first, same lock order as request_refund
        let payment = tx
            .get_payment_by_id(payment.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment {} not found", payment.id)))?;
        let current = tx
            .get_refund_by_id(refund_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("refund {} not found", refund_id)))?;
        if current.status != RefundStatus::RefundRequested {
            return Ok(current);
        }

        let completed = tx
            .update_refund_status(refund_id, RefundStatus::Completed, Some(provider_refund_id))
            .await?;
        tx.update_payment_status(&PaymentTransition::new(&payment, PaymentStatus::Refunded))
            .await?;
        insert_event(tx.as_mut(), &refund_event(&completed, EventType::RefundSucceeded)?).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %completed.order_id,
            refund_id = %completed.id,
            "Refund completed"
        );
        Ok(completed)
    }

    // ========================= RECONCILE =========================

    /// Ask the gateway about a payment still in PROCESSING and apply a final
    /// outcome the same way an IPN would. `None` while it is still open.
    pub async fn reconcile_payment(&self, payment: &Payment) -> AppResult<Option<IpnAck>> {
        let Some(order_ref) = payment.provider_order_ref.as_deref() else {
            return Err(AppError::PreconditionFailed(format!(
                "payment {} has no gateway reference to reconcile",
                payment.id
            )));
        };
        let gateway = self.providers.get(&payment.provider)?;
        let result = gateway.get_payment_status(payment).await?;

        match result.status {
            PaymentStatus::Success | PaymentStatus::Failed => {
                let ack = self
                    .apply_outcome(payment.order_id, order_ref, result.status, result.provider_txn_id, None)
                    .await?;
                Ok(Some(ack))
            }
            _ => Ok(None),
        }
    }

    /// Payment truth for an order. A PROCESSING payment is checked at the
    /// gateway; nothing is written.
    pub async fn payment_status_for_order(&self, order_id: Uuid) -> AppResult<OrderPaymentStatus> {
        let mut tx = self.store.begin().await?;
        let payment = tx
            .get_payment_by_order_id(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no payment for order {}", order_id)))?;
        tx.commit().await?;

        if payment.status != PaymentStatus::Processing {
            return Ok(OrderPaymentStatus {
                order_id,
                payment_id: payment.id,
                status: payment.status,
                provider_txn_id: payment.provider_txn_id,
            });
        }

        let gateway = self.providers.get(&payment.provider)?;
        let result = gateway.get_payment_status(&payment).await?;
        Ok(OrderPaymentStatus {
            order_id,
            payment_id: payment.id,
            status: result.status,
            provider_txn_id: result.provider_txn_id,
        })
    }
}
