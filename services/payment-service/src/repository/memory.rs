// /shop-platform/services/payment-service/src/repository/memory.rs

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex as StdMutex},
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{PaymentStore, PaymentTx};
use crate::{
    models::{
        NewPayment, NewPaymentEvent, NewRefund, OutboxStats, OutboxStatus, Payment, PaymentEvent,
        PaymentStatus, PaymentTransition, Refund, RefundStatus,
    },
    utils::error::{AppError, AppResult},
};

#[derive(Debug, Clone, Default)]
struct PaymentState {
    payments: Vec<Payment>,
    refunds: Vec<Refund>,
    events: Vec<PaymentEvent>,
}

/// In-process store with the same constraints as the SQL schema.
///
/// A transaction holds the store lock for its whole life and works on a copy
/// of the state; `commit` swaps the copy in.
#[derive(Clone, Default)]
pub struct MemoryPaymentStore {
    state: Arc<Mutex<PaymentState>>,
    /// Outbox event ids whose status writes fail with `Transient`
    broken_events: Arc<StdMutex<HashSet<String>>>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.clone()
    }

    pub async fn refunds(&self) -> Vec<Refund> {
        self.state.lock().await.refunds.clone()
    }

    pub async fn events(&self) -> Vec<PaymentEvent> {
        self.state.lock().await.events.clone()
    }

    /// Drop an outbox row as if it never made it to the table
    pub async fn delete_payment_event(&self, event_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let before = state.events.len();
        state.events.retain(|e| e.event_id != event_id);
        state.events.len() != before
    }

    /// Make every status write for this outbox event fail until cleared
    pub fn fail_outbox_writes(&self, event_id: &str) {
        if let Ok(mut broken) = self.broken_events.lock() {
            broken.insert(event_id.to_string());
        }
    }

    pub fn clear_outbox_failures(&self) {
        if let Ok(mut broken) = self.broken_events.lock() {
            broken.clear();
        }
    }

    /// Move a payment's clock back, used to make rows look stale
    pub async fn backdate_payment(&self, payment_id: Uuid, to: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(p) = state.payments.iter_mut().find(|p| p.id == payment_id) {
            p.updated_at = to;
        }
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn begin(&self) -> AppResult<Box<dyn PaymentTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryPaymentTx {
            guard,
            working,
            broken_events: self.broken_events.clone(),
        }))
    }
}

pub struct MemoryPaymentTx {
    guard: OwnedMutexGuard<PaymentState>,
    working: PaymentState,
    broken_events: Arc<StdMutex<HashSet<String>>>,
}

fn is_live(status: PaymentStatus) -> bool {
    matches!(
        status,
        PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Success
    )
}

impl MemoryPaymentTx {
    fn event_mut(&mut self, id: Uuid) -> AppResult<&mut PaymentEvent> {
        let broken = self
            .broken_events
            .lock()
            .map_err(|_| AppError::Internal("outbox failure set lock poisoned".to_string()))?
            .clone();
        let event = self
            .working
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| AppError::NotFound(format!("payment event {} not found", id)))?;
        if broken.contains(&event.event_id) {
            return Err(AppError::Transient(format!(
                "injected write failure for outbox event {}",
                event.event_id
            )));
        }
        Ok(event)
    }
}

#[async_trait]
impl PaymentTx for MemoryPaymentTx {
    async fn create_payment(&mut self, new: &NewPayment) -> AppResult<Payment> {
        if self
            .working
            .payments
            .iter()
            .any(|p| p.order_id == new.order_id && is_live(p.status))
        {
            return Err(AppError::IntegrityViolation(format!(
                "order {} already has a live payment",
                new.order_id
            )));
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            order_id: new.order_id,
            user_id: new.user_id,
            amount: new.amount.clone(),
            currency: new.currency.clone(),
            method: new.method,
            provider: new.provider.clone(),
            provider_txn_id: None,
            provider_order_ref: None,
            pay_url: None,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.working.payments.push(payment.clone());
        Ok(payment)
    }

    async fn get_payment_by_id(&mut self, id: Uuid) -> AppResult<Option<Payment>> {
        Ok(self.working.payments.iter().find(|p| p.id == id).cloned())
    }

    async fn get_payment_by_order_id(&mut self, order_id: Uuid) -> AppResult<Option<Payment>> {
        // insertion order breaks created_at ties
        Ok(self
            .working
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .last()
            .cloned())
    }

    async fn update_payment_status(&mut self, transition: &PaymentTransition) -> AppResult<Payment> {
        let payment = self
            .working
            .payments
            .iter_mut()
            .find(|p| p.id == transition.payment_id && p.status == transition.from)
            .ok_or_else(|| {
                AppError::PreconditionFailed(format!(
                    "payment {} is no longer {}",
                    transition.payment_id, transition.from
                ))
            })?;

        payment.status = transition.to;
        if payment.provider_txn_id.is_none() {
            payment.provider_txn_id = transition.provider_txn_id.clone();
        }
        if transition.provider_order_ref.is_some() {
            payment.provider_order_ref = transition.provider_order_ref.clone();
        }
        if transition.pay_url.is_some() {
            payment.pay_url = transition.pay_url.clone();
        }
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn list_pending_payments(
        &mut self,
        status: PaymentStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Payment>> {
        let mut rows: Vec<Payment> = self
            .working
            .payments
            .iter()
            .filter(|p| p.status == status && p.updated_at < older_than)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.updated_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn create_refund(&mut self, new: &NewRefund) -> AppResult<Refund> {
        if self
            .working
            .refunds
            .iter()
            .any(|r| r.payment_id == new.payment_id && !r.status.is_terminal())
        {
            return Err(AppError::IntegrityViolation(format!(
                "payment {} already has a refund in flight",
                new.payment_id
            )));
        }

        let now = Utc::now();
        let refund = Refund {
            id: Uuid::new_v4(),
            payment_id: new.payment_id,
            order_id: new.order_id,
            amount: new.amount.clone(),
            reason: new.reason.clone(),
            provider_refund_id: None,
            status: RefundStatus::RefundRequested,
            created_at: now,
            updated_at: now,
        };
        self.working.refunds.push(refund.clone());
        Ok(refund)
    }

    async fn get_refund_by_id(&mut self, id: Uuid) -> AppResult<Option<Refund>> {
        Ok(self.working.refunds.iter().find(|r| r.id == id).cloned())
    }

    async fn get_refund_by_payment_id(&mut self, payment_id: Uuid) -> AppResult<Option<Refund>> {
        Ok(self
            .working
            .refunds
            .iter()
            .filter(|r| r.payment_id == payment_id)
            .last()
            .cloned())
    }

    async fn update_refund_status(
        &mut self,
        id: Uuid,
        status: RefundStatus,
        provider_refund_id: Option<&str>,
    ) -> AppResult<Refund> {
        let refund = self
            .working
            .refunds
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::NotFound(format!("refund {} not found", id)))?;

        refund.status = status;
        if let Some(provider_refund_id) = provider_refund_id {
            refund.provider_refund_id = Some(provider_refund_id.to_string());
        }
        refund.updated_at = Utc::now();
        Ok(refund.clone())
    }

    async fn list_refunds_by_status(&mut self, status: RefundStatus, limit: i64) -> AppResult<Vec<Refund>> {
        Ok(self
            .working
            .refunds
            .iter()
            .filter(|r| r.status == status)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn sum_completed_refunds(&mut self, payment_id: Uuid) -> AppResult<BigDecimal> {
        Ok(self
            .working
            .refunds
            .iter()
            .filter(|r| r.payment_id == payment_id && r.status == RefundStatus::Completed)
            .fold(BigDecimal::zero(), |acc, r| acc + &r.amount))
    }

    async fn create_payment_event(&mut self, new: &NewPaymentEvent) -> AppResult<PaymentEvent> {
        if self.working.events.iter().any(|e| e.event_id == new.event_id) {
            return Err(AppError::IntegrityViolation(format!(
                "duplicate event_id {}",
                new.event_id
            )));
        }
        if !self.working.payments.iter().any(|p| p.id == new.payment_id) {
            return Err(AppError::IntegrityViolation(format!(
                "payment {} does not exist",
                new.payment_id
            )));
        }

        let now = Utc::now();
        let event = PaymentEvent {
            id: Uuid::new_v4(),
            event_id: new.event_id.clone(),
            payment_id: new.payment_id,
            order_id: new.order_id,
            event_type: new.event_type,
            payload: new.payload.clone(),
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.working.events.push(event.clone());
        Ok(event)
    }

    async fn list_pending_payment_events(&mut self, limit: i64) -> AppResult<Vec<PaymentEvent>> {
        let mut rows: Vec<PaymentEvent> = self
            .working
            .events
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.created_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn mark_event_sent(&mut self, id: Uuid) -> AppResult<()> {
        let event = self.event_mut(id)?;
        event.status = OutboxStatus::Sent;
        event.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_event_failed(&mut self, id: Uuid, max_retry: i32) -> AppResult<PaymentEvent> {
        let event = self.event_mut(id)?;
        event.retry_count += 1;
        if event.retry_count >= max_retry {
            event.status = OutboxStatus::Failed;
        }
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn cleanup_sent_events(&mut self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let before = self.working.events.len();
        self.working
            .events
            .retain(|e| !(e.status == OutboxStatus::Sent && e.updated_at < older_than));
        Ok((before - self.working.events.len()) as u64)
    }

    async fn outbox_stats(&mut self) -> AppResult<OutboxStats> {
        let count = |status: OutboxStatus| {
            self.working.events.iter().filter(|e| e.status == status).count() as i64
        };
        Ok(OutboxStats {
            pending: count(OutboxStatus::Pending),
            sent: count(OutboxStatus::Sent),
            failed: count(OutboxStatus::Failed),
            total: self.working.events.len() as i64,
        })
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryPaymentTx { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }
}
