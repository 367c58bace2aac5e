// /shop-platform/services/payment-service/src/core/events.rs

use event_bus::{EventEnvelope, EventType};
use uuid::Uuid;

use crate::{
    models::{NewPaymentEvent, Payment, PaymentStatus, Refund},
    utils::error::AppResult,
};

/// Namespace for v5 event ids emitted by this service
const EVENT_NAMESPACE: Uuid = Uuid::from_u128(0x3b7f_5c1e_8a2d_4e6f_9b0c_1d2e_3f4a_5b6c);

/// Event id of a payment reaching `status`. Same inputs, same id, so a second
/// emission for the same transition collides on UNIQUE(event_id).
pub fn payment_event_id(payment_id: Uuid, status: PaymentStatus) -> String {
    Uuid::new_v5(&EVENT_NAMESPACE, format!("{}:{}", payment_id, status.as_str()).as_bytes()).to_string()
}

/// Refund events are keyed by the refund, a payment may be refunded more than
/// once over its life only through distinct refund rows.
pub fn refund_event_id(refund_id: Uuid, event_type: EventType) -> String {
    Uuid::new_v5(&EVENT_NAMESPACE, format!("{}:{}", refund_id, event_type.as_str()).as_bytes()).to_string()
}

/// Outbox row for a payment transition (PAYMENT_SUCCESS / PAYMENT_FAILED)
pub fn payment_outcome_event(payment: &Payment, status: PaymentStatus) -> AppResult<NewPaymentEvent> {
    let event_type = match status {
        PaymentStatus::Success => EventType::PaymentSuccess,
        _ => EventType::PaymentFailed,
    };
    let envelope = EventEnvelope::new(
        payment_event_id(payment.id, status),
        event_type,
        payment.order_id,
        payment.id,
        serde_json::json!({
            "status": status,
            "amount": payment.amount.to_string(),
            "currency": payment.currency,
            "provider": payment.provider,
            "provider_txn_id": payment.provider_txn_id,
        }),
    );
    to_outbox(envelope)
}

/// Outbox row for a refund milestone (REFUND_REQUESTED / REFUND_SUCCEEDED)
pub fn refund_event(refund: &Refund, event_type: EventType) -> AppResult<NewPaymentEvent> {
    let envelope = EventEnvelope::new(
        refund_event_id(refund.id, event_type),
        event_type,
        refund.order_id,
        refund.payment_id,
        serde_json::json!({
            "refund_id": refund.id,
            "amount": refund.amount.to_string(),
            "reason": refund.reason,
            "provider_refund_id": refund.provider_refund_id,
        }),
    );
    to_outbox(envelope)
}

fn to_outbox(envelope: EventEnvelope) -> AppResult<NewPaymentEvent> {
    Ok(NewPaymentEvent {
        payload: envelope.to_bytes()?,
        event_id: envelope.event_id,
        payment_id: envelope.payment_id,
        order_id: envelope.order_id,
        event_type: envelope.event_type,
    })
}
