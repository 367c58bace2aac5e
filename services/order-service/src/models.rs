// /shop-platform/services/order-service/src/models.rs

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use event_bus::EventType;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::VecDeque, fmt, str::FromStr};
use uuid::Uuid;

use crate::utils::error::{AppError, AppResult};

// ========================= STATUS ENUMS =========================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    PendingPayment,
    PaymentFailed,
    Processing,
    Shipped,
    Delivering,
    Delivered,
    Canceled,
    Refunded,
    Failed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Pending,
        OrderStatus::PendingPayment,
        OrderStatus::PaymentFailed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivering,
        OrderStatus::Delivered,
        OrderStatus::Canceled,
        OrderStatus::Refunded,
        OrderStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::PaymentFailed => "PAYMENT_FAILED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivering => "DELIVERING",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Refunded => "REFUNDED",
            OrderStatus::Failed => "FAILED",
        }
    }

    /// Allowed successors of a status
    pub fn next_states(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[PendingPayment, Canceled],
            PendingPayment => &[Processing, PaymentFailed, Canceled],
            Processing => &[Shipped, Canceled, Refunded],
            Shipped => &[Delivering, Canceled, Refunded],
            Delivering => &[Delivered, Canceled, Refunded],
            Delivered => &[Refunded],
            PaymentFailed | Canceled | Refunded | Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.next_states().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.next_states().is_empty()
    }

    /// True when `self` lies strictly downstream of `earlier` in the
    /// transition graph. Reachability alone does not prove an order passed
    /// through `earlier` (CANCELED is downstream of PROCESSING); callers pair
    /// it with the status history.
    pub fn is_after(&self, earlier: OrderStatus) -> bool {
        let mut seen = vec![earlier];
        let mut queue = VecDeque::from([earlier]);
        while let Some(current) = queue.pop_front() {
            for next in current.next_states() {
                if *next == *self {
                    return true;
                }
                if !seen.contains(next) {
                    seen.push(*next);
                    queue.push_back(*next);
                }
            }
        }
        false
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| AppError::Internal(format!("unknown order status {}", s)))
    }
}

/// Inbox row state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboxStatus {
    Pending,
    Processed,
    Failed,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Pending => "PENDING",
            InboxStatus::Processed => "PROCESSED",
            InboxStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for InboxStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(InboxStatus::Pending),
            "PROCESSED" => Ok(InboxStatus::Processed),
            "FAILED" => Ok(InboxStatus::Failed),
            other => Err(AppError::Internal(format!("unknown inbox status {}", other))),
        }
    }
}

/// Which PENDING inbox rows a processor pass picks up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxQueue {
    /// Never attempted
    Fresh,
    /// Failed at least once, still below max_retry
    Retry,
}

// ========================= DOMAIN MODELS =========================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub shop_id: Uuid,
    pub shipping_address_id: Uuid,
    pub promotion_id: Option<Uuid>,
    pub shipping_fee: BigDecimal,
    pub discount_amount: BigDecimal,
    pub total_amount: BigDecimal,
    pub final_amount: BigDecimal,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// final = total + shipping fee - discount, never negative
    pub fn compute_final_amount(
        total_amount: &BigDecimal,
        shipping_fee: &BigDecimal,
        discount_amount: &BigDecimal,
    ) -> AppResult<BigDecimal> {
        let final_amount = total_amount + shipping_fee - discount_amount;
        if final_amount < BigDecimal::zero() {
            return Err(AppError::PreconditionFailed(format!(
                "final amount {} is negative",
                final_amount
            )));
        }
        Ok(final_amount)
    }

    /// Re-check the derived amount before any write
    pub fn verify_amounts(&self) -> AppResult<()> {
        let expected =
            Self::compute_final_amount(&self.total_amount, &self.shipping_fee, &self.discount_amount)?;
        if expected != self.final_amount {
            return Err(AppError::IntegrityViolation(format!(
                "order {} final amount {} does not match {}",
                self.id, self.final_amount, expected
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

/// Order as created upstream (checkout)
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub owner_id: Uuid,
    pub shop_id: Uuid,
    pub shipping_address_id: Uuid,
    pub promotion_id: Option<Uuid>,
    pub shipping_fee: BigDecimal,
    pub discount_amount: BigDecimal,
    pub status: OrderStatus,
    pub items: Vec<NewOrderItem>,
}

impl NewOrder {
    pub fn total_amount(&self) -> BigDecimal {
        self.items
            .iter()
            .map(|item| &item.unit_price * BigDecimal::from(item.quantity))
            .fold(BigDecimal::zero(), |acc, line| acc + line)
    }
}

/// One applied transition, appended in the same transaction as the update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub id: Uuid,
    pub order_id: Uuid,
    pub from_status: OrderStatus,
    pub to_status: OrderStatus,
    pub event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of `update_order_status`
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Applied(Order),
    /// Order already had the requested status; nothing written
    AlreadyApplied(Order),
    /// Order passed through the requested status and moved on; nothing written
    Superseded(Order),
}

impl StatusUpdate {
    pub fn order(&self) -> &Order {
        match self {
            StatusUpdate::Applied(o) | StatusUpdate::AlreadyApplied(o) | StatusUpdate::Superseded(o) => o,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, StatusUpdate::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboxEvent {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: EventType,
    pub source_service: String,
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub status: InboxStatus,
    pub retry_count: i32,
    pub max_retry: i32,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInboxEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub source_service: String,
    pub payload: Vec<u8>,
    pub max_retry: i32,
}

/// Result of inserting into the inbox
#[derive(Debug, Clone, PartialEq)]
pub enum InboxInsert {
    Inserted(InboxEvent),
    /// A row with the same event_id already exists
    Duplicate(InboxEvent),
}

impl InboxInsert {
    pub fn event(&self) -> &InboxEvent {
        match self {
            InboxInsert::Inserted(e) | InboxInsert::Duplicate(e) => e,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InboxStats {
    pub pending: i64,
    pub processed: i64,
    pub failed: i64,
    pub total: i64,
}

// ========================= DATABASE ROWS =========================

#[derive(Debug, FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub shop_id: Uuid,
    pub shipping_address_id: Uuid,
    pub promotion_id: Option<Uuid>,
    pub shipping_fee: BigDecimal,
    pub discount_amount: BigDecimal,
    pub total_amount: BigDecimal,
    pub final_amount: BigDecimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    pub fn into_order(self, items: Vec<OrderItem>) -> AppResult<Order> {
        Ok(Order {
            id: self.id,
            owner_id: self.owner_id,
            shop_id: self.shop_id,
            shipping_address_id: self.shipping_address_id,
            promotion_id: self.promotion_id,
            shipping_fee: self.shipping_fee,
            discount_amount: self.discount_amount,
            total_amount: self.total_amount,
            final_amount: self.final_amount,
            status: self.status.parse()?,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct OrderItemRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct StatusChangeRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub from_status: String,
    pub to_status: String,
    pub event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<StatusChangeRow> for StatusChange {
    type Error = AppError;

    fn try_from(row: StatusChangeRow) -> AppResult<Self> {
        Ok(StatusChange {
            id: row.id,
            order_id: row.order_id,
            from_status: row.from_status.parse()?,
            to_status: row.to_status.parse()?,
            event_id: row.event_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct InboxEventRow {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub source_service: String,
    pub payload: Vec<u8>,
    pub status: String,
    pub retry_count: i32,
    pub max_retry: i32,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<InboxEventRow> for InboxEvent {
    type Error = AppError;

    fn try_from(row: InboxEventRow) -> AppResult<Self> {
        Ok(InboxEvent {
            id: row.id,
            event_id: row.event_id,
            event_type: row.event_type.parse().map_err(AppError::Internal)?,
            source_service: row.source_service,
            payload: row.payload,
            status: row.status.parse()?,
            retry_count: row.retry_count,
            max_retry: row.max_retry,
            last_error: row.last_error,
            received_at: row.received_at,
            processed_at: row.processed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ========================= RESPONSE DTOs =========================

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
}
