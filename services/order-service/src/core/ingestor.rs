// /shop-platform/services/order-service/src/core/ingestor.rs

use async_trait::async_trait;
use event_bus::{EventType, MessageHandler};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::{
    models::{InboxInsert, InboxStatus, NewInboxEvent},
    repository::{with_transaction, OrderStore},
    utils::error::{AppError, AppResult},
};

pub const PAYMENT_SOURCE: &str = "payment-service";

/// Payload `event_id` when present, otherwise sha256(key || value) in hex.
pub fn derive_event_id(key: &[u8], value: &[u8], payload: &Value) -> String {
    if let Some(event_id) = payload.get("event_id").and_then(Value::as_str) {
        if !event_id.is_empty() {
            return event_id.to_string();
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(value);
    hex::encode(hasher.finalize())
}

/// Explicit `event_type`, or a guess from the payload shape. Records with
/// neither are rejected.
pub fn derive_event_type(payload: &Value) -> AppResult<EventType> {
    if let Some(raw) = payload.get("event_type").and_then(Value::as_str) {
        return raw.parse().map_err(AppError::Decode);
    }

    // legacy refund notifications carried only the ids
    if payload.get("order_id").is_some() && payload.get("payment_id").is_some() {
        return Ok(EventType::RefundSucceeded);
    }

    Err(AppError::Decode("cannot determine event type".to_string()))
}

/// Consumer-side half of the inbox: persists every record before its offset
/// is committed. Applying the event is left to the inbox processor.
pub struct InboxIngestor {
    store: Arc<dyn OrderStore>,
    max_retry: i32,
}

impl InboxIngestor {
    pub fn new(store: Arc<dyn OrderStore>, max_retry: i32) -> Self {
        Self { store, max_retry }
    }

    pub async fn ingest(&self, key: &[u8], value: &[u8]) -> AppResult<InboxInsert> {
        let payload: Value = serde_json::from_slice(value)?;
        if !payload.is_object() {
            return Err(AppError::Decode("payload is not a JSON object".to_string()));
        }

        let new = NewInboxEvent {
            event_id: derive_event_id(key, value, &payload),
            event_type: derive_event_type(&payload)?,
            source_service: PAYMENT_SOURCE.to_string(),
            payload: value.to_vec(),
            max_retry: self.max_retry,
        };

        let inserted = with_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.insert_inbox_event(&new).await })
        })
        .await?;

        match &inserted {
            InboxInsert::Inserted(event) => tracing::info!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "Inbox event stored"
            ),
            InboxInsert::Duplicate(event) if event.status == InboxStatus::Processed => tracing::debug!(
                event_id = %event.event_id,
                "Duplicate of an already processed event, skipping"
            ),
            InboxInsert::Duplicate(event) => tracing::debug!(
                event_id = %event.event_id,
                status = event.status.as_str(),
                "Duplicate event already queued in inbox"
            ),
        }
        Ok(inserted)
    }
}

#[async_trait]
impl MessageHandler for InboxIngestor {
    type Error = AppError;

    async fn handle(&self, key: &[u8], value: &[u8]) -> Result<(), AppError> {
        self.ingest(key, value).await.map(|_| ())
    }
}
