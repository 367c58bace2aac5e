// /shop-platform/services/order-service/src/core/mod.rs

pub mod dispatch;
pub mod ingestor;
pub mod payment_client;

pub use dispatch::{apply_inbox_event, target_status, ApplyOutcome};
pub use ingestor::{derive_event_id, derive_event_type, InboxIngestor};
pub use payment_client::{HttpPaymentStatusClient, PaymentStatusReport, PaymentStatusSource};
