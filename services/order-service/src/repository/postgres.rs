// /shop-platform/services/order-service/src/repository/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{plan_transition, OrderStore, OrderTx, Plan};
use crate::{
    models::{
        InboxEvent, InboxEventRow, InboxInsert, InboxQueue, InboxStats, NewInboxEvent, NewOrder,
        Order, OrderItem, OrderItemRow, OrderRow, OrderStatus, StatusChange, StatusChangeRow,
        StatusUpdate,
    },
    utils::error::{AppError, AppResult},
};

const ORDER_COLUMNS: &str = "id, owner_id, shop_id, shipping_address_id, promotion_id, shipping_fee, \
     discount_amount, total_amount, final_amount, status, created_at, updated_at";

const INBOX_COLUMNS: &str = "id, event_id, event_type, source_service, payload, status, retry_count, \
     max_retry, last_error, received_at, processed_at, created_at, updated_at";

/// Postgres-backed order store
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
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
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn begin(&self) -> AppResult<Box<dyn OrderTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgOrderTx { tx }))
    }
}

pub struct PgOrderTx {
    tx: Transaction<'static, Postgres>,
}

impl PgOrderTx {
    async fn load_items(&mut self, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT id, order_id, product_id, quantity, unit_price FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    async fn hydrate(&mut self, row: OrderRow) -> AppResult<Order> {
        let items = self.load_items(row.id).await?;
        row.into_order(items)
    }

    async fn has_reached(&mut self, order_id: Uuid, status: OrderStatus) -> AppResult<bool> {
        let reached: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM order_status_history WHERE order_id = $1 AND to_status = $2)",
        )
        .bind(order_id)
        .bind(status.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(reached)
    }
}

#[async_trait]
impl OrderTx for PgOrderTx {
    async fn create_order(&mut self, new: &NewOrder) -> AppResult<Order> {
        let total_amount = new.total_amount();
        let final_amount =
            Order::compute_final_amount(&total_amount, &new.shipping_fee, &new.discount_amount)?;
        let order_id = Uuid::new_v4();

        let sql = format!(
            r#"
            INSERT INTO orders (id, owner_id, shop_id, shipping_address_id, promotion_id,
                                shipping_fee, discount_amount, total_amount, final_amount, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .bind(new.owner_id)
            .bind(new.shop_id)
            .bind(new.shipping_address_id)
            .bind(new.promotion_id)
            .bind(&new.shipping_fee)
            .bind(&new.discount_amount)
            .bind(&total_amount)
            .bind(&final_amount)
            .bind(new.status.as_str())
            .fetch_one(&mut *self.tx)
            .await?;

        for item in &new.items {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(order_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(&item.unit_price)
            .execute(&mut *self.tx)
            .await?;
        }

        tracing::debug!(order_id = %order_id, status = %new.status, "Order row created");
        self.hydrate(row).await
    }

    async fn get_order_by_id(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1 FOR UPDATE", ORDER_COLUMNS);
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn update_order_status(
        &mut self,
        order_id: Uuid,
        to: OrderStatus,
        event_id: Option<&str>,
    ) -> AppResult<StatusUpdate> {
        let order = self
            .get_order_by_id(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;
        order.verify_amounts()?;

        let reached_before = order.status != to
            && !order.status.can_transition_to(to)
            && self.has_reached(order_id, to).await?;

        match plan_transition(order_id, order.status, to, reached_before)? {
            Plan::AlreadyApplied => return Ok(StatusUpdate::AlreadyApplied(order)),
            Plan::Superseded => return Ok(StatusUpdate::Superseded(order)),
            Plan::Apply => {}
        }

        let sql = format!(
            r#"
            UPDATE orders SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .bind(order.status.as_str())
            .bind(to.as_str())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| {
                AppError::PreconditionFailed(format!("order {} is no longer {}", order_id, order.status))
            })?;

        sqlx::query(
            r#"
            INSERT INTO order_status_history (id, order_id, from_status, to_status, event_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(order.status.as_str())
        .bind(to.as_str())
        .bind(event_id)
        .execute(&mut *self.tx)
        .await?;

        let items = order.items;
        Ok(StatusUpdate::Applied(row.into_order(items)?))
    }

    async fn list_stale_orders(
        &mut self,
        status: OrderStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {} FROM orders
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#,
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(status.as_str())
            .bind(older_than)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(self.hydrate(row).await?);
        }
        Ok(orders)
    }

    async fn status_history(&mut self, order_id: Uuid) -> AppResult<Vec<StatusChange>> {
        sqlx::query_as::<_, StatusChangeRow>(
            r#"
            SELECT id, order_id, from_status, to_status, event_id, created_at
            FROM order_status_history
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
        .map(StatusChange::try_from)
        .collect()
    }

    async fn insert_inbox_event(&mut self, new: &NewInboxEvent) -> AppResult<InboxInsert> {
        let sql = format!(
            r#"
            INSERT INTO order_inbox_events (id, event_id, event_type, source_service, payload,
                                            status, retry_count, max_retry)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6)
            ON CONFLICT (event_id) DO NOTHING
            RETURNING {}
            "#,
            INBOX_COLUMNS
        );
        let inserted = sqlx::query_as::<_, InboxEventRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.event_id)
            .bind(new.event_type.as_str())
            .bind(&new.source_service)
            .bind(&new.payload)
            .bind(new.max_retry)
            .fetch_optional(&mut *self.tx)
            .await?;

        if let Some(row) = inserted {
            return Ok(InboxInsert::Inserted(row.try_into()?));
        }

        let sql = format!("SELECT {} FROM order_inbox_events WHERE event_id = $1", INBOX_COLUMNS);
        let existing = sqlx::query_as::<_, InboxEventRow>(&sql)
            .bind(&new.event_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(InboxInsert::Duplicate(existing.try_into()?))
    }

    async fn get_inbox_event(&mut self, id: Uuid) -> AppResult<Option<InboxEvent>> {
        let sql = format!("SELECT {} FROM order_inbox_events WHERE id = $1 FOR UPDATE", INBOX_COLUMNS);
        sqlx::query_as::<_, InboxEventRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(InboxEvent::try_from)
            .transpose()
    }

    async fn list_inbox_events(&mut self, queue: InboxQueue, limit: i64) -> AppResult<Vec<InboxEvent>> {
        let retry_filter = match queue {
            InboxQueue::Fresh => "retry_count = 0",
            InboxQueue::Retry => "retry_count > 0",
        };
        let sql = format!(
            r#"
            SELECT {} FROM order_inbox_events
            WHERE status = 'PENDING' AND {}
            ORDER BY received_at ASC
            LIMIT $1
            "#,
            INBOX_COLUMNS, retry_filter
        );
        sqlx::query_as::<_, InboxEventRow>(&sql)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(InboxEvent::try_from)
            .collect()
    }

    async fn mark_inbox_processed(&mut self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE order_inbox_events
            SET status = 'PROCESSED', processed_at = NOW(), last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("inbox event {} not found", id)));
        }
        Ok(())
    }

    async fn mark_inbox_failed(&mut self, id: Uuid, error: &str) -> AppResult<InboxEvent> {
        let sql = format!(
            r#"
            UPDATE order_inbox_events
            SET retry_count = LEAST(retry_count + 1, max_retry),
                status = CASE WHEN retry_count + 1 >= max_retry THEN 'FAILED' ELSE status END,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            INBOX_COLUMNS
        );
        sqlx::query_as::<_, InboxEventRow>(&sql)
            .bind(id)
            .bind(error)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("inbox event {} not found", id)))?
            .try_into()
    }

    async fn cleanup_processed_inbox(&mut self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM order_inbox_events WHERE status = 'PROCESSED' AND processed_at < $1",
        )
        .bind(older_than)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn inbox_stats(&mut self) -> AppResult<InboxStats> {
        let (pending, processed, failed, total): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING'),
                COUNT(*) FILTER (WHERE status = 'PROCESSED'),
                COUNT(*) FILTER (WHERE status = 'FAILED'),
                COUNT(*)
            FROM order_inbox_events
            "#,
        )
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(InboxStats { pending, processed, failed, total })
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
