// /shop-platform/services/payment-service/src/models.rs

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::{DateTime, Utc};
use event_bus::EventType;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::utils::error::{AppError, AppResult};

// ========================= STATUS ENUMS =========================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    /// FAILED and REFUNDED never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }

    /// Edges of the payment DAG
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Success)
                | (Processing, Failed)
                | (Success, Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PROCESSING" => Ok(PaymentStatus::Processing),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(AppError::Internal(format!("unknown payment status {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cod,
    CreditCard,
    BankTransfer,
    EWallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cod => "COD",
            PaymentMethod::CreditCard => "CREDIT_CARD",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::EWallet => "E_WALLET",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COD" => Ok(PaymentMethod::Cod),
            "CREDIT_CARD" => Ok(PaymentMethod::CreditCard),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            "E_WALLET" => Ok(PaymentMethod::EWallet),
            other => Err(AppError::Internal(format!("unknown payment method {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    RefundRequested,
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "PENDING",
            RefundStatus::RefundRequested => "REFUND_REQUESTED",
            RefundStatus::Completed => "COMPLETED",
            RefundStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RefundStatus::Completed | RefundStatus::Failed)
    }
}

impl FromStr for RefundStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RefundStatus::Pending),
            "REFUND_REQUESTED" => Ok(RefundStatus::RefundRequested),
            "COMPLETED" => Ok(RefundStatus::Completed),
            "FAILED" => Ok(RefundStatus::Failed),
            other => Err(AppError::Internal(format!("unknown refund status {}", other))),
        }
    }
}

/// Outbox row state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(AppError::Internal(format!("unknown outbox status {}", other))),
        }
    }
}

// ========================= DOMAIN MODELS =========================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub provider: String,
    pub provider_txn_id: Option<String>,
    /// Order reference sent to the gateway (`{order_id}_{request_id}`)
    pub provider_order_ref: Option<String>,
    pub pay_url: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub reason: Option<String>,
    pub provider_refund_id: Option<String>,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outbox row. `payload` is the serialized bus envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    pub id: Uuid,
    pub event_id: String,
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub event_type: EventType,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub provider: String,
}

/// Status change applied by the store. `from` guards against lost updates.
#[derive(Debug, Clone)]
pub struct PaymentTransition {
    pub payment_id: Uuid,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub provider_txn_id: Option<String>,
    pub provider_order_ref: Option<String>,
    pub pay_url: Option<String>,
}

impl PaymentTransition {
    pub fn new(payment: &Payment, to: PaymentStatus) -> Self {
        Self {
            payment_id: payment.id,
            from: payment.status,
            to,
            provider_txn_id: None,
            provider_order_ref: None,
            pay_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRefund {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentEvent {
    pub event_id: String,
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub event_type: EventType,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
    pub total: i64,
}

// ========================= DATABASE ROWS =========================

#[derive(Debug, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub method: String,
    pub provider: String,
    pub provider_txn_id: Option<String>,
    pub provider_order_ref: Option<String>,
    pub pay_url: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = AppError;

    fn try_from(row: PaymentRow) -> AppResult<Self> {
        Ok(Payment {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            amount: row.amount,
            currency: row.currency,
            method: row.method.parse()?,
            provider: row.provider,
            provider_txn_id: row.provider_txn_id,
            provider_order_ref: row.provider_order_ref,
            pay_url: row.pay_url,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct RefundRow {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub reason: Option<String>,
    pub provider_refund_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RefundRow> for Refund {
    type Error = AppError;

    fn try_from(row: RefundRow) -> AppResult<Self> {
        Ok(Refund {
            id: row.id,
            payment_id: row.payment_id,
            order_id: row.order_id,
            amount: row.amount,
            reason: row.reason,
            provider_refund_id: row.provider_refund_id,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PaymentEventRow {
    pub id: Uuid,
    pub event_id: String,
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub status: String,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentEventRow> for PaymentEvent {
    type Error = AppError;

    fn try_from(row: PaymentEventRow) -> AppResult<Self> {
        Ok(PaymentEvent {
            id: row.id,
            event_id: row.event_id,
            payment_id: row.payment_id,
            order_id: row.order_id,
            event_type: row.event_type.parse().map_err(AppError::Internal)?,
            payload: row.payload,
            status: row.status.parse()?,
            retry_count: row.retry_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ========================= REQUEST / RESPONSE DTOs =========================

#[derive(Debug, Clone, Deserialize)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
    pub method: PaymentMethod,
    pub amount: BigDecimal,
    /// Gateway name, defaults to the configured provider
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub order_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub pay_url: Option<String>,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefundRequest {
    /// Defaults to the full payment amount
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
}

/// Outcome of an IPN after it went through the state machine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpnAck {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    /// false when the notification was a replay and nothing changed
    pub applied: bool,
}

/// Payment truth for an order, served to the order reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPaymentStatus {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub provider_txn_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error_code: Option<String>,
    pub details: Option<serde_json::Value>,
}

// ========================= HELPERS =========================

/// Gateway amounts are integer minor units
pub fn to_minor_units(amount: &BigDecimal) -> AppResult<i64> {
    if amount < &BigDecimal::zero() {
        return Err(AppError::PreconditionFailed("amount must not be negative".to_string()));
    }
    amount
        .round(0)
        .to_i64()
        .ok_or_else(|| AppError::PreconditionFailed(format!("amount {} out of range", amount)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_dag_edges() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Success));
        assert!(Success.can_transition_to(Refunded));

        assert!(!Processing.can_transition_to(Pending));
        assert!(!Success.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Success));
        assert!(!Refunded.can_transition_to(Success));
        assert!(Failed.is_terminal() && Refunded.is_terminal());
        assert!(!Success.is_terminal());
    }

    #[test]
    fn test_status_text_roundtrip() {
        for status in ["PENDING", "PROCESSING", "SUCCESS", "FAILED", "REFUNDED"] {
            assert_eq!(status.parse::<PaymentStatus>().unwrap().as_str(), status);
        }
        assert!("PAID".parse::<PaymentStatus>().is_err());
        assert_eq!("E_WALLET".parse::<PaymentMethod>().unwrap(), PaymentMethod::EWallet);
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(&BigDecimal::from(250000)).unwrap(), 250000);
        assert!(to_minor_units(&BigDecimal::from(-1)).is_err());
    }

    #[test]
    fn test_initiate_request_wire_format() {
        let order_id = Uuid::new_v4();
        let body = serde_json::json!({
            "order_id": order_id,
            "method": "E_WALLET",
            "amount": "250000"
        });
        let req: InitiatePaymentRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.method, PaymentMethod::EWallet);
        assert_eq!(req.amount, BigDecimal::from(250000));
        assert!(req.provider.is_none());
    }
}
