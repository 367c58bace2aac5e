// /shop-platform/services/order-service/src/repository/memory.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{plan_transition, OrderStore, OrderTx, Plan};
use crate::{
    models::{
        InboxEvent, InboxInsert, InboxQueue, InboxStats, InboxStatus, NewInboxEvent, NewOrder,
        Order, OrderItem, OrderStatus, StatusChange, StatusUpdate,
    },
    utils::error::{AppError, AppResult},
};

#[derive(Debug, Clone, Default)]
struct OrderState {
    orders: Vec<Order>,
    history: Vec<StatusChange>,
    inbox: Vec<InboxEvent>,
}

/// Injected write failures: the first `per_order` status updates of every
/// order fail with `Transient`. Lives outside the transactional state so a
/// rollback does not reset it.
#[derive(Debug, Default)]
struct FailurePlan {
    per_order: u32,
    attempts: HashMap<Uuid, u32>,
}

/// In-process store mirroring the SQL schema constraints.
#[derive(Clone, Default)]
pub struct MemoryOrderStore {
    state: Arc<Mutex<OrderState>>,
    failures: Arc<StdMutex<FailurePlan>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the first `n` status updates of each order fail
    pub fn fail_updates_per_order(&self, n: u32) {
        if let Ok(mut plan) = self.failures.lock() {
            plan.per_order = n;
            plan.attempts.clear();
        }
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.clone()
    }

    pub async fn order(&self, id: Uuid) -> Option<Order> {
        self.state.lock().await.orders.iter().find(|o| o.id == id).cloned()
    }

    pub async fn history(&self, order_id: Uuid) -> Vec<StatusChange> {
        self.state
            .lock()
            .await
            .history
            .iter()
            .filter(|h| h.order_id == order_id)
            .cloned()
            .collect()
    }

    pub async fn inbox(&self) -> Vec<InboxEvent> {
        self.state.lock().await.inbox.clone()
    }

    /// Move an order's clock back, used to make rows look stale
    pub async fn backdate_order(&self, order_id: Uuid, to: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(o) = state.orders.iter_mut().find(|o| o.id == order_id) {
            o.updated_at = to;
        }
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn begin(&self) -> AppResult<Box<dyn OrderTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryOrderTx {
            guard,
            working,
            failures: self.failures.clone(),
        }))
    }
}

pub struct MemoryOrderTx {
    guard: OwnedMutexGuard<OrderState>,
    working: OrderState,
    failures: Arc<StdMutex<FailurePlan>>,
}

impl MemoryOrderTx {
    fn inbox_mut(&mut self, id: Uuid) -> AppResult<&mut InboxEvent> {
        self.working
            .inbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| AppError::NotFound(format!("inbox event {} not found", id)))
    }

    fn injected_failure(&self, order_id: Uuid) -> AppResult<()> {
        let mut plan = self
            .failures
            .lock()
            .map_err(|_| AppError::Internal("failure plan lock poisoned".to_string()))?;
        if plan.per_order == 0 {
            return Ok(());
        }
        let limit = plan.per_order;
        let attempts = plan.attempts.entry(order_id).or_insert(0);
        *attempts += 1;
        if *attempts <= limit {
            return Err(AppError::Transient(format!(
                "injected update failure {} for order {}",
                attempts, order_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderTx for MemoryOrderTx {
    async fn create_order(&mut self, new: &NewOrder) -> AppResult<Order> {
        let total_amount = new.total_amount();
        let final_amount =
            Order::compute_final_amount(&total_amount, &new.shipping_fee, &new.discount_amount)?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = Order {
            id: order_id,
            owner_id: new.owner_id,
            shop_id: new.shop_id,
            shipping_address_id: new.shipping_address_id,
            promotion_id: new.promotion_id,
            shipping_fee: new.shipping_fee.clone(),
            discount_amount: new.discount_amount.clone(),
            total_amount,
            final_amount,
            status: new.status,
            items: new
                .items
                .iter()
                .map(|item| OrderItem {
                    id: Uuid::new_v4(),
                    order_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price.clone(),
                })
                .collect(),
            created_at: now,
            updated_at: now,
        };
        self.working.orders.push(order.clone());
        Ok(order)
    }

    async fn get_order_by_id(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.working.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn update_order_status(
        &mut self,
        order_id: Uuid,
        to: OrderStatus,
        event_id: Option<&str>,
    ) -> AppResult<StatusUpdate> {
        self.injected_failure(order_id)?;

        let reached_before = self
            .working
            .history
            .iter()
            .any(|c| c.order_id == order_id && c.to_status == to);
        let order = self
            .working
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;
        order.verify_amounts()?;

        match plan_transition(order_id, order.status, to, reached_before)? {
            Plan::AlreadyApplied => return Ok(StatusUpdate::AlreadyApplied(order.clone())),
            Plan::Superseded => return Ok(StatusUpdate::Superseded(order.clone())),
            Plan::Apply => {}
        }

        let from = order.status;
        let now = Utc::now();
        order.status = to;
        order.updated_at = now;
        let updated = order.clone();

        self.working.history.push(StatusChange {
            id: Uuid::new_v4(),
            order_id,
            from_status: from,
            to_status: to,
            event_id: event_id.map(str::to_string),
            created_at: now,
        });
        Ok(StatusUpdate::Applied(updated))
    }

    async fn list_stale_orders(
        &mut self,
        status: OrderStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Order>> {
        let mut rows: Vec<Order> = self
            .working
            .orders
            .iter()
            .filter(|o| o.status == status && o.updated_at < older_than)
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.updated_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn status_history(&mut self, order_id: Uuid) -> AppResult<Vec<StatusChange>> {
        Ok(self
            .working
            .history
            .iter()
            .filter(|h| h.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_inbox_event(&mut self, new: &NewInboxEvent) -> AppResult<InboxInsert> {
        if let Some(existing) = self.working.inbox.iter().find(|e| e.event_id == new.event_id) {
            return Ok(InboxInsert::Duplicate(existing.clone()));
        }

        let now = Utc::now();
        let event = InboxEvent {
            id: Uuid::new_v4(),
            event_id: new.event_id.clone(),
            event_type: new.event_type,
            source_service: new.source_service.clone(),
            payload: new.payload.clone(),
            status: InboxStatus::Pending,
            retry_count: 0,
            max_retry: new.max_retry,
            last_error: None,
            received_at: now,
            processed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.working.inbox.push(event.clone());
        Ok(InboxInsert::Inserted(event))
    }

    async fn get_inbox_event(&mut self, id: Uuid) -> AppResult<Option<InboxEvent>> {
        Ok(self.working.inbox.iter().find(|e| e.id == id).cloned())
    }

    async fn list_inbox_events(&mut self, queue: InboxQueue, limit: i64) -> AppResult<Vec<InboxEvent>> {
        let mut rows: Vec<InboxEvent> = self
            .working
            .inbox
            .iter()
            .filter(|e| e.status == InboxStatus::Pending)
            .filter(|e| match queue {
                InboxQueue::Fresh => e.retry_count == 0,
                InboxQueue::Retry => e.retry_count > 0,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.received_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn mark_inbox_processed(&mut self, id: Uuid) -> AppResult<()> {
        let event = self.inbox_mut(id)?;
        let now = Utc::now();
        event.status = InboxStatus::Processed;
        event.processed_at = Some(now);
        event.last_error = None;
        event.updated_at = now;
        Ok(())
    }

    async fn mark_inbox_failed(&mut self, id: Uuid, error: &str) -> AppResult<InboxEvent> {
        let event = self.inbox_mut(id)?;
        event.retry_count = (event.retry_count + 1).min(event.max_retry);
        if event.retry_count >= event.max_retry {
            event.status = InboxStatus::Failed;
        }
        event.last_error = Some(error.to_string());
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn cleanup_processed_inbox(&mut self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let before = self.working.inbox.len();
        self.working.inbox.retain(|e| {
            !(e.status == InboxStatus::Processed && e.processed_at.is_some_and(|at| at < older_than))
        });
        Ok((before - self.working.inbox.len()) as u64)
    }

    async fn inbox_stats(&mut self) -> AppResult<InboxStats> {
        let count = |status: InboxStatus| {
            self.working.inbox.iter().filter(|e| e.status == status).count() as i64
        };
        Ok(InboxStats {
            pending: count(InboxStatus::Pending),
            processed: count(InboxStatus::Processed),
            failed: count(InboxStatus::Failed),
            total: self.working.inbox.len() as i64,
        })
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryOrderTx { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewOrderItem;
    use bigdecimal::BigDecimal;
    use event_bus::EventType;

    fn new_order(status: OrderStatus) -> NewOrder {
        NewOrder {
            owner_id: Uuid::new_v4(),
            shop_id: Uuid::new_v4(),
            shipping_address_id: Uuid::new_v4(),
            promotion_id: None,
            shipping_fee: BigDecimal::from(30000),
            discount_amount: BigDecimal::from(10000),
            status,
            items: vec![NewOrderItem {
                product_id: Uuid::new_v4(),
                quantity: 2,
                unit_price: BigDecimal::from(115000),
            }],
        }
    }

    fn new_inbox(event_id: &str) -> NewInboxEvent {
        NewInboxEvent {
            event_id: event_id.to_string(),
            event_type: EventType::PaymentSuccess,
            source_service: "payment-service".to_string(),
            payload: b"{}".to_vec(),
            max_retry: 3,
        }
    }

    #[tokio::test]
    async fn test_create_order_derives_amounts() {
        let store = MemoryOrderStore::new();
        let mut tx = store.begin().await.unwrap();
        let order = tx.create_order(&new_order(OrderStatus::PendingPayment)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(order.total_amount, BigDecimal::from(230000));
        assert_eq!(order.final_amount, BigDecimal::from(250000));
        assert_eq!(order.items.len(), 1);
        assert!(order.verify_amounts().is_ok());
    }

    #[tokio::test]
    async fn test_update_status_outcomes() {
        let store = MemoryOrderStore::new();
        let mut tx = store.begin().await.unwrap();
        let order = tx.create_order(&new_order(OrderStatus::PendingPayment)).await.unwrap();

        let applied = tx
            .update_order_status(order.id, OrderStatus::Processing, Some("evt-1"))
            .await
            .unwrap();
        assert!(applied.is_applied());

        let again = tx
            .update_order_status(order.id, OrderStatus::Processing, Some("evt-2"))
            .await
            .unwrap();
        assert!(matches!(again, StatusUpdate::AlreadyApplied(_)));

        tx.update_order_status(order.id, OrderStatus::Shipped, None).await.unwrap();
        let late = tx
            .update_order_status(order.id, OrderStatus::Processing, Some("evt-3"))
            .await
            .unwrap();
        assert!(matches!(late, StatusUpdate::Superseded(_)));

        let illegal = tx
            .update_order_status(order.id, OrderStatus::PaymentFailed, Some("evt-4"))
            .await;
        assert!(matches!(illegal, Err(AppError::InvalidTransition { .. })));

        let history = tx.status_history(order.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from_status, OrderStatus::PendingPayment);
        assert_eq!(history[0].to_status, OrderStatus::Processing);
        assert_eq!(history[0].event_id.as_deref(), Some("evt-1"));
    }

    #[tokio::test]
    async fn test_status_never_reached_is_not_superseded() {
        let store = MemoryOrderStore::new();
        let mut tx = store.begin().await.unwrap();
        let order = tx.create_order(&new_order(OrderStatus::PendingPayment)).await.unwrap();
        tx.update_order_status(order.id, OrderStatus::Canceled, None).await.unwrap();

        // CANCELED is downstream of PROCESSING in the graph, but this order never got there
        let late = tx
            .update_order_status(order.id, OrderStatus::Processing, Some("evt-1"))
            .await;
        assert!(matches!(late, Err(AppError::InvalidTransition { .. })));
        assert_eq!(tx.status_history(order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryOrderStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.create_order(&new_order(OrderStatus::PendingPayment)).await.unwrap();
            tx.insert_inbox_event(&new_inbox("evt-1")).await.unwrap();
        }
        assert!(store.orders().await.is_empty());
        assert!(store.inbox().await.is_empty());
    }

    #[tokio::test]
    async fn test_inbox_dedup_and_retry_cap() {
        let store = MemoryOrderStore::new();
        let mut tx = store.begin().await.unwrap();

        let first = tx.insert_inbox_event(&new_inbox("evt-1")).await.unwrap();
        assert!(matches!(first, InboxInsert::Inserted(_)));
        let second = tx.insert_inbox_event(&new_inbox("evt-1")).await.unwrap();
        assert!(matches!(second, InboxInsert::Duplicate(_)));
        assert_eq!(second.event().id, first.event().id);

        let id = first.event().id;
        assert_eq!(tx.list_inbox_events(InboxQueue::Fresh, 10).await.unwrap().len(), 1);

        tx.mark_inbox_failed(id, "boom").await.unwrap();
        assert!(tx.list_inbox_events(InboxQueue::Fresh, 10).await.unwrap().is_empty());
        assert_eq!(tx.list_inbox_events(InboxQueue::Retry, 10).await.unwrap().len(), 1);

        tx.mark_inbox_failed(id, "boom").await.unwrap();
        let failed = tx.mark_inbox_failed(id, "boom").await.unwrap();
        assert_eq!(failed.status, InboxStatus::Failed);
        assert_eq!(failed.retry_count, 3);

        let capped = tx.mark_inbox_failed(id, "boom").await.unwrap();
        assert_eq!(capped.retry_count, 3);

        let stats = tx.inbox_stats().await.unwrap();
        assert_eq!(stats, InboxStats { pending: 0, processed: 0, failed: 1, total: 1 });
    }

    #[tokio::test]
    async fn test_injected_failures_survive_rollback() {
        let store = MemoryOrderStore::new();
        let mut tx = store.begin().await.unwrap();
        let order = tx.create_order(&new_order(OrderStatus::PendingPayment)).await.unwrap();
        tx.commit().await.unwrap();

        store.fail_updates_per_order(2);
        for _ in 0..2 {
            let mut tx = store.begin().await.unwrap();
            let result = tx.update_order_status(order.id, OrderStatus::Processing, None).await;
            assert!(matches!(result, Err(AppError::Transient(_))));
        }

        let mut tx = store.begin().await.unwrap();
        let result = tx.update_order_status(order.id, OrderStatus::Processing, None).await.unwrap();
        assert!(result.is_applied());
    }
}
