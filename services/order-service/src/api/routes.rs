// /shop-platform/services/order-service/src/api/routes.rs

use axum::{http::StatusCode, routing::get, Router};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::handlers;
use crate::AppState;

/// Create semua routes untuk order service
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/api/orders/{id}", get(handlers::get_order))
        // Monitoring
        .route("/api/inbox/stats", get(handlers::get_inbox_stats))
        .route("/api/debug/scheduler/status", get(handlers::get_scheduler_status))
        .route("/health", get(handlers::health_check))
}

pub fn create_app(state: AppState, request_timeout: Duration) -> Router {
    with_middleware(Router::new().merge(create_routes()).with_state(state), request_timeout)
}

/// Tracing outside, then a timeout answering 408
fn with_middleware(app: Router, request_timeout: Duration) -> Router {
    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_slow_request_times_out() {
        let app = with_middleware(
            Router::new().route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    "done"
                }),
            ),
            Duration::from_millis(20),
        );

        let response = app
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
