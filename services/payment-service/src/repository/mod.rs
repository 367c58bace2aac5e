// /shop-platform/services/payment-service/src/repository/mod.rs

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    models::{
        NewPayment, NewPaymentEvent, NewRefund, OutboxStats, Payment, PaymentEvent,
        PaymentStatus, PaymentTransition, Refund, RefundStatus,
    },
    utils::error::AppResult,
};

pub use memory::MemoryPaymentStore;
pub use postgres::PgPaymentStore;

/// Entry point to payment persistence. Every operation runs inside a
/// [`PaymentTx`] so that multi-table writes commit or roll back together.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn PaymentTx>>;
}

/// An open unit of work. Dropping it without `commit` rolls back.
///
/// Reads of payments and refunds lock the row until the transaction ends.
#[async_trait]
pub trait PaymentTx: Send {
    // ----- payments -----
    async fn create_payment(&mut self, new: &NewPayment) -> AppResult<Payment>;

    async fn get_payment_by_id(&mut self, id: Uuid) -> AppResult<Option<Payment>>;

    /// Most recent payment of an order
    async fn get_payment_by_order_id(&mut self, order_id: Uuid) -> AppResult<Option<Payment>>;

    /// Fails with `PreconditionFailed` when the row is no longer in `transition.from`
    async fn update_payment_status(&mut self, transition: &PaymentTransition) -> AppResult<Payment>;

    /// Payments in `status` last touched before `older_than`, oldest first
    async fn list_pending_payments(
        &mut self,
        status: PaymentStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Payment>>;

    // ----- refunds -----
    async fn create_refund(&mut self, new: &NewRefund) -> AppResult<Refund>;

    async fn get_refund_by_id(&mut self, id: Uuid) -> AppResult<Option<Refund>>;

    /// Most recent refund of a payment
    async fn get_refund_by_payment_id(&mut self, payment_id: Uuid) -> AppResult<Option<Refund>>;

    async fn update_refund_status(
        &mut self,
        id: Uuid,
        status: RefundStatus,
        provider_refund_id: Option<&str>,
    ) -> AppResult<Refund>;

    async fn list_refunds_by_status(&mut self, status: RefundStatus, limit: i64) -> AppResult<Vec<Refund>>;

    async fn sum_completed_refunds(&mut self, payment_id: Uuid) -> AppResult<BigDecimal>;

    // ----- outbox -----
    /// Duplicate event ids fail with `IntegrityViolation` and leave the
    /// transaction usable, so the caller may still commit its other writes.
    async fn create_payment_event(&mut self, new: &NewPaymentEvent) -> AppResult<PaymentEvent>;

    async fn list_pending_payment_events(&mut self, limit: i64) -> AppResult<Vec<PaymentEvent>>;

    async fn mark_event_sent(&mut self, id: Uuid) -> AppResult<()>;

    /// Bumps retry_count; the row turns FAILED once it reaches `max_retry`
    async fn mark_event_failed(&mut self, id: Uuid, max_retry: i32) -> AppResult<PaymentEvent>;

    async fn cleanup_sent_events(&mut self, older_than: DateTime<Utc>) -> AppResult<u64>;

    async fn outbox_stats(&mut self) -> AppResult<OutboxStats>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Acquire a transaction, run `f` in it and commit on success. Any error
/// drops the transaction, which rolls it back.
pub async fn with_transaction<T, F>(store: &dyn PaymentStore, f: F) -> AppResult<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn PaymentTx) -> BoxFuture<'t, AppResult<T>> + Send,
{
    let mut tx = store.begin().await?;
    let value = f(tx.as_mut()).await?;
    tx.commit().await?;
    Ok(value)
}
