// /shop-platform/services/payment-service/src/api/routes.rs

use axum::{
    http::StatusCode,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::handlers;
use crate::AppState;

/// Create semua routes untuk payment service
pub fn create_routes() -> Router<AppState> {
    Router::new()
        // Checkout
        .route("/api/payments", post(handlers::initiate_payment))
        // Gateway callback (public, verified by signature)
        .route("/api/payments/ipn/{provider}", post(handlers::handle_ipn))
        // Refund
        .route("/api/payments/{id}/refund", post(handlers::request_refund))
        // Internal lookup used by the order reconciler
        .route(
            "/internal/payments/orders/{order_id}/status",
            get(handlers::get_order_payment_status),
        )
        // Monitoring
        .route("/api/outbox/stats", get(handlers::get_outbox_stats))
        .route("/api/debug/scheduler/status", get(handlers::get_scheduler_status))
        .route("/health", get(handlers::health_check))
}

/// Full application with state and middleware stack applied
pub fn create_app(state: AppState, request_timeout: Duration) -> Router {
    with_middleware(Router::new().merge(create_routes()).with_state(state), request_timeout)
}

fn with_middleware(app: Router, request_timeout: Duration) -> Router {
    app.layer(
        ServiceBuilder::new()
            // Request tracing (paling luar)
            .layer(TraceLayer::new_for_http())
            // Timeout protection, answers 408
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout)),
    )
}
