// /shop-platform/services/order-service/src/repository/mod.rs

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    models::{
        InboxEvent, InboxInsert, InboxQueue, InboxStats, NewInboxEvent, NewOrder, Order,
        OrderStatus, StatusChange, StatusUpdate,
    },
    utils::error::AppResult,
};

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

/// Entry point to order persistence: orders, their status history and the inbox.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn OrderTx>>;
}

/// An open unit of work. Dropping it without `commit` rolls back.
#[async_trait]
pub trait OrderTx: Send {
    // ----- orders -----
    async fn create_order(&mut self, new: &NewOrder) -> AppResult<Order>;

    /// Locks the order row until the transaction ends
    async fn get_order_by_id(&mut self, id: Uuid) -> AppResult<Option<Order>>;

    /// Lock, validate against the transition table and update.
    ///
    /// A status the order already has yields `AlreadyApplied`. A status the
    /// order's history shows it passed through yields `Superseded`. Neither
    /// writes anything.
    /// Any other illegal move fails with `InvalidTransition`. An applied
    /// change appends one history row tagged with `event_id`.
    async fn update_order_status(
        &mut self,
        order_id: Uuid,
        to: OrderStatus,
        event_id: Option<&str>,
    ) -> AppResult<StatusUpdate>;

    /// Orders in `status` last touched before `older_than`, oldest first
    async fn list_stale_orders(
        &mut self,
        status: OrderStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Order>>;

    async fn status_history(&mut self, order_id: Uuid) -> AppResult<Vec<StatusChange>>;

    // ----- inbox -----
    /// Insert a PENDING row, or return the existing row for the same event_id
    async fn insert_inbox_event(&mut self, new: &NewInboxEvent) -> AppResult<InboxInsert>;

    /// Locks the inbox row until the transaction ends
    async fn get_inbox_event(&mut self, id: Uuid) -> AppResult<Option<InboxEvent>>;

    async fn list_inbox_events(&mut self, queue: InboxQueue, limit: i64) -> AppResult<Vec<InboxEvent>>;

    async fn mark_inbox_processed(&mut self, id: Uuid) -> AppResult<()>;

    /// Bumps retry_count; the row turns FAILED once it reaches its max_retry
    async fn mark_inbox_failed(&mut self, id: Uuid, error: &str) -> AppResult<InboxEvent>;

    async fn cleanup_processed_inbox(&mut self, older_than: DateTime<Utc>) -> AppResult<u64>;

    async fn inbox_stats(&mut self) -> AppResult<InboxStats>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Acquire a transaction, run `f` in it and commit on success. Any error
/// drops the transaction, which rolls it back.
pub async fn with_transaction<T, F>(store: &dyn OrderStore, f: F) -> AppResult<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn OrderTx) -> BoxFuture<'t, AppResult<T>> + Send,
{
    let mut tx = store.begin().await?;
    let value = f(tx.as_mut()).await?;
    tx.commit().await?;
    Ok(value)
}

/// Classify a requested move from `current` to `to`. `reached_before` says
/// whether the order's history already records a move into `to`; only then
/// is a target behind the current status treated as superseded.
pub(crate) fn plan_transition(
    order_id: Uuid,
    current: OrderStatus,
    to: OrderStatus,
    reached_before: bool,
) -> AppResult<Plan> {
    if current == to {
        return Ok(Plan::AlreadyApplied);
    }
    if current.can_transition_to(to) {
        return Ok(Plan::Apply);
    }
    if reached_before && current.is_after(to) {
        return Ok(Plan::Superseded);
    }
    tracing::debug!(order_id = %order_id, from = %current, to = %to, "Rejected order transition");
    Err(crate::utils::error::AppError::InvalidTransition {
        from: current.to_string(),
        to: to.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plan {
    Apply,
    AlreadyApplied,
    Superseded,
}
