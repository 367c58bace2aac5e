// /shop-platform/services/order-service/src/lib.rs

//! Order side of the order/payment pipeline: the inbox that absorbs payment
//! events exactly once, the order status machine they drive, and the
//! reconciler that rescues orders whose events were lost.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod repository;
pub mod utils;
pub mod workers;

use std::sync::Arc;

use crate::{repository::OrderStore, utils::scheduler::SchedulerMetrics};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub scheduler_metrics: Arc<SchedulerMetrics>,
}
