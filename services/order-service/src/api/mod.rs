// /shop-platform/services/order-service/src/api/mod.rs

pub mod handlers;
pub mod routes;
