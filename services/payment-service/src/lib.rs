// /shop-platform/services/payment-service/src/lib.rs

//! Payment side of the order/payment pipeline: gateway adapters, the payment
//! state machine with its transactional outbox, and the workers that drain
//! the outbox, drive refunds and reconcile unanswered payments.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod repository;
pub mod utils;
pub mod workers;

use std::sync::Arc;

use crate::{core::coordinator::PaymentCoordinator, utils::scheduler::SchedulerMetrics};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<PaymentCoordinator>,
    pub scheduler_metrics: Arc<SchedulerMetrics>,
}
