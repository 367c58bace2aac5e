// /shop-platform/services/order-service/src/core/dispatch.rs

use event_bus::EventType;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    models::{InboxStatus, OrderStatus, StatusUpdate},
    repository::{with_transaction, OrderStore},
    utils::error::{AppError, AppResult},
};

/// What applying one inbox row did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Order moved, history appended, row PROCESSED
    Applied,
    /// Order already had (or had moved past) the target; row PROCESSED
    NoOp,
    /// Event carries no order effect; row PROCESSED
    Acknowledged,
    /// Row was gone or no longer PENDING when locked
    Skipped,
}

/// Order status an event drives the order to, if any
pub fn target_status(event_type: EventType) -> Option<OrderStatus> {
    match event_type {
        EventType::PaymentSuccess => Some(OrderStatus::Processing),
        EventType::PaymentFailed => Some(OrderStatus::PaymentFailed),
        EventType::RefundSucceeded => Some(OrderStatus::Refunded),
        EventType::RefundRequested => None,
    }
}

fn order_id_of(payload: &[u8]) -> AppResult<Uuid> {
    let value: Value = serde_json::from_slice(payload)?;
    let raw = value
        .get("order_id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Decode("payload has no order_id".to_string()))?;
    Uuid::parse_str(raw).map_err(|e| AppError::Decode(format!("invalid order_id {}: {}", raw, e)))
}

/// Apply one inbox row to its order and mark it PROCESSED, all in one
/// transaction. Any error rolls both back and leaves the row untouched.
pub async fn apply_inbox_event(store: &dyn OrderStore, inbox_id: Uuid) -> AppResult<ApplyOutcome> {
    with_transaction(store, move |tx| {
        Box::pin(async move {
            let Some(event) = tx.get_inbox_event(inbox_id).await? else {
                return Ok(ApplyOutcome::Skipped);
            };
            if event.status != InboxStatus::Pending {
                return Ok(ApplyOutcome::Skipped);
            }

            let outcome = match target_status(event.event_type) {
                None => ApplyOutcome::Acknowledged,
                Some(to) => {
                    let order_id = order_id_of(&event.payload)?;
                    match tx.update_order_status(order_id, to, Some(event.event_id.as_str())).await? {
                        StatusUpdate::Applied(order) => {
                            tracing::info!(
                                order_id = %order.id,
                                event_id = %event.event_id,
                                status = %order.status,
                                "Order status updated from inbox event"
                            );
                            ApplyOutcome::Applied
                        }
                        StatusUpdate::AlreadyApplied(order) | StatusUpdate::Superseded(order) => {
                            tracing::info!(
                                order_id = %order.id,
                                event_id = %event.event_id,
                                status = %order.status,
                                target = %to,
                                "Order already at or past target status"
                            );
                            ApplyOutcome::NoOp
                        }
                    }
                }
            };

            tx.mark_inbox_processed(event.id).await?;
            Ok(outcome)
        })
    })
    .await
}
