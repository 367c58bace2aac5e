// /shop-platform/services/payment-service/src/repository/postgres.rs

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{PaymentStore, PaymentTx};
use crate::{
    models::{
        NewPayment, NewPaymentEvent, NewRefund, OutboxStats, Payment, PaymentEvent,
        PaymentEventRow, PaymentRow, PaymentStatus, PaymentTransition, Refund, RefundRow,
        RefundStatus,
    },
    utils::error::{AppError, AppResult},
};

const PAYMENT_COLUMNS: &str = "id, order_id, user_id, amount, currency, method, provider, \
     provider_txn_id, provider_order_ref, pay_url, status, created_at, updated_at";

const REFUND_COLUMNS: &str =
    "id, payment_id, order_id, amount, reason, provider_refund_id, status, created_at, updated_at";

const EVENT_COLUMNS: &str =
    "id, event_id, payment_id, order_id, event_type, payload, status, retry_count, created_at, updated_at";

/// Postgres-backed payment store
#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("migration failed: {}", e)))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn begin(&self) -> AppResult<Box<dyn PaymentTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgPaymentTx { tx }))
    }
}

pub struct PgPaymentTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PaymentTx for PgPaymentTx {
    async fn create_payment(&mut self, new: &NewPayment) -> AppResult<Payment> {
        let sql = format!(
            r#"
            INSERT INTO payments (id, order_id, user_id, amount, currency, method, provider, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING')
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.order_id)
            .bind(new.user_id)
            .bind(&new.amount)
            .bind(&new.currency)
            .bind(new.method.as_str())
            .bind(&new.provider)
            .fetch_one(&mut *self.tx)
            .await?;

        tracing::debug!(order_id = %new.order_id, payment_id = %row.id, "Payment row created");
        row.try_into()
    }

    async fn get_payment_by_id(&mut self, id: Uuid) -> AppResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1 FOR UPDATE", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn get_payment_by_order_id(&mut self, order_id: Uuid) -> AppResult<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE order_id = $1 ORDER BY created_at DESC LIMIT 1 FOR UPDATE",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn update_payment_status(&mut self, transition: &PaymentTransition) -> AppResult<Payment> {
        // provider_txn_id is write-once
        let sql = format!(
            r#"
            UPDATE payments
            SET status = $3,
                provider_txn_id = COALESCE(provider_txn_id, $4),
                provider_order_ref = COALESCE($5, provider_order_ref),
                pay_url = COALESCE($6, pay_url),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(transition.payment_id)
            .bind(transition.from.as_str())
            .bind(transition.to.as_str())
            .bind(&transition.provider_txn_id)
            .bind(&transition.provider_order_ref)
            .bind(&transition.pay_url)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| {
                AppError::PreconditionFailed(format!(
                    "payment {} is no longer {}",
                    transition.payment_id, transition.from
                ))
            })?;

        row.try_into()
    }

    async fn list_pending_payments(
        &mut self,
        status: PaymentStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Payment>> {
        let sql = format!(
            r#"
            SELECT {} FROM payments
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(status.as_str())
            .bind(older_than)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }

    async fn create_refund(&mut self, new: &NewRefund) -> AppResult<Refund> {
        let sql = format!(
            r#"
            INSERT INTO refund_payments (id, payment_id, order_id, amount, reason, status)
            VALUES ($1, $2, $3, $4, $5, 'REFUND_REQUESTED')
            RETURNING {}
            "#,
            REFUND_COLUMNS
        );

        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.payment_id)
            .bind(new.order_id)
            .bind(&new.amount)
            .bind(&new.reason)
            .fetch_one(&mut *self.tx)
            .await?
            .try_into()
    }

    async fn get_refund_by_id(&mut self, id: Uuid) -> AppResult<Option<Refund>> {
        let sql = format!("SELECT {} FROM refund_payments WHERE id = $1 FOR UPDATE", REFUND_COLUMNS);
        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Refund::try_from)
            .transpose()
    }

    async fn get_refund_by_payment_id(&mut self, payment_id: Uuid) -> AppResult<Option<Refund>> {
        let sql = format!(
            "SELECT {} FROM refund_payments WHERE payment_id = $1 ORDER BY created_at DESC LIMIT 1 FOR UPDATE",
            REFUND_COLUMNS
        );
        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(payment_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Refund::try_from)
            .transpose()
    }

    async fn update_refund_status(
        &mut self,
        id: Uuid,
        status: RefundStatus,
        provider_refund_id: Option<&str>,
    ) -> AppResult<Refund> {
        let sql = format!(
            r#"
            UPDATE refund_payments
            SET status = $2,
                provider_refund_id = COALESCE($3, provider_refund_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            REFUND_COLUMNS
        );

        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(provider_refund_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("refund {} not found", id)))?
            .try_into()
    }

    async fn list_refunds_by_status(&mut self, status: RefundStatus, limit: i64) -> AppResult<Vec<Refund>> {
        let sql = format!(
            "SELECT {} FROM refund_payments WHERE status = $1 ORDER BY created_at ASC LIMIT $2",
            REFUND_COLUMNS
        );
        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(Refund::try_from)
            .collect()
    }

    async fn sum_completed_refunds(&mut self, payment_id: Uuid) -> AppResult<BigDecimal> {
        let total: BigDecimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM refund_payments WHERE payment_id = $1 AND status = 'COMPLETED'",
        )
        .bind(payment_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(total)
    }

    async fn create_payment_event(&mut self, new: &NewPaymentEvent) -> AppResult<PaymentEvent> {
        let sql = format!(
            r#"
            INSERT INTO payment_events (id, event_id, payment_id, order_id, event_type, payload, status, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', 0)
            ON CONFLICT (event_id) DO NOTHING
            RETURNING {}
            "#,
            EVENT_COLUMNS
        );

        // a raised unique violation would abort the surrounding transaction
        let row = sqlx::query_as::<_, PaymentEventRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.event_id)
            .bind(new.payment_id)
            .bind(new.order_id)
            .bind(new.event_type.as_str())
            .bind(&new.payload)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| AppError::IntegrityViolation(format!("duplicate event_id {}", new.event_id)))?;

        tracing::debug!(event_id = %new.event_id, event_type = %new.event_type, "Outbox row written");
        row.try_into()
    }

    async fn list_pending_payment_events(&mut self, limit: i64) -> AppResult<Vec<PaymentEvent>> {
        let sql = format!(
            r#"
            SELECT {} FROM payment_events
            WHERE status = 'PENDING'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
            EVENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentEventRow>(&sql)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(PaymentEvent::try_from)
            .collect()
    }

    async fn mark_event_sent(&mut self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE payment_events SET status = 'SENT', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("payment event {} not found", id)));
        }
        Ok(())
    }

    async fn mark_event_failed(&mut self, id: Uuid, max_retry: i32) -> AppResult<PaymentEvent> {
        let sql = format!(
            r#"
            UPDATE payment_events
            SET retry_count = retry_count + 1,
                status = CASE WHEN retry_count + 1 >= $2 THEN 'FAILED' ELSE status END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            EVENT_COLUMNS
        );

        sqlx::query_as::<_, PaymentEventRow>(&sql)
            .bind(id)
            .bind(max_retry)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment event {} not found", id)))?
            .try_into()
    }

    async fn cleanup_sent_events(&mut self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM payment_events WHERE status = 'SENT' AND updated_at < $1")
            .bind(older_than)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn outbox_stats(&mut self) -> AppResult<OutboxStats> {
        let (pending, sent, failed, total): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING'),
                COUNT(*) FILTER (WHERE status = 'SENT'),
                COUNT(*) FILTER (WHERE status = 'FAILED'),
                COUNT(*)
            FROM payment_events
            "#,
        )
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(OutboxStats { pending, sent, failed, total })
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
