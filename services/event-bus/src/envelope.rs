// /shop-platform/services/event-bus/src/envelope.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::{error::BusError, PAYMENT_EVENTS_TOPIC};

/// Domain events emitted by the payment service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    PaymentSuccess,
    PaymentFailed,
    RefundRequested,
    RefundSucceeded,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::PaymentSuccess,
        EventType::PaymentFailed,
        EventType::RefundRequested,
        EventType::RefundSucceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PaymentSuccess => "PAYMENT_SUCCESS",
            EventType::PaymentFailed => "PAYMENT_FAILED",
            EventType::RefundRequested => "REFUND_REQUESTED",
            EventType::RefundSucceeded => "REFUND_SUCCEEDED",
        }
    }

    /// Topic a given event type is published on. All payment events share one
    /// topic so that the order_id key keeps them ordered relative to each other.
    pub fn topic(&self) -> &'static str {
        PAYMENT_EVENTS_TOPIC
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // older producers used lower-case names (e.g. "refund_succeeded")
        match s.to_ascii_uppercase().as_str() {
            "PAYMENT_SUCCESS" => Ok(EventType::PaymentSuccess),
            "PAYMENT_FAILED" => Ok(EventType::PaymentFailed),
            "REFUND_REQUESTED" => Ok(EventType::RefundRequested),
            "REFUND_SUCCEEDED" => Ok(EventType::RefundSucceeded),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// Common wire envelope for every record on `payment_events`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: EventType,
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(
        event_id: impl Into<String>,
        event_type: EventType,
        order_id: Uuid,
        payment_id: Uuid,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type,
            order_id,
            payment_id,
            occurred_at: Utc::now(),
            data,
        }
    }

    /// Key used for partitioning; keeps all events of one order in one partition
    pub fn key(&self) -> String {
        self.order_id.to_string()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&EventType::RefundSucceeded).unwrap();
        assert_eq!(json, "\"REFUND_SUCCEEDED\"");
        assert_eq!("refund_succeeded".parse::<EventType>().unwrap(), EventType::RefundSucceeded);
        assert!("ORDER_SHIPPED".parse::<EventType>().is_err());
    }

    #[test]
    fn test_envelope_schema_fields() {
        let order_id = Uuid::new_v4();
        let envelope = EventEnvelope::new(
            "evt-1",
            EventType::PaymentSuccess,
            order_id,
            Uuid::new_v4(),
            serde_json::json!({ "provider_txn_id": "99" }),
        );

        let value: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(value["event_id"], "evt-1");
        assert_eq!(value["event_type"], "PAYMENT_SUCCESS");
        assert_eq!(value["order_id"], order_id.to_string());
        assert!(value["occurred_at"].is_string());
        assert_eq!(value["data"]["provider_txn_id"], "99");
        assert_eq!(envelope.key(), order_id.to_string());
    }
}
