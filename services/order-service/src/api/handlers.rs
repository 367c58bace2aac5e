// /shop-platform/services/order-service/src/api/handlers.rs

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    models::*,
    repository::with_transaction,
    utils::error::{AppError, AppResult},
    AppState,
};

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub history: Vec<StatusChange>,
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    let detail = with_transaction(state.store.as_ref(), move |tx| {
        Box::pin(async move {
            let order = tx
                .get_order_by_id(order_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;
            let history = tx.status_history(order_id).await?;
            Ok(OrderDetail { order, history })
        })
    })
    .await?;

    Ok(Json(ApiResponse::ok("Order ditemukan", detail)))
}

// ========================= MONITORING HANDLERS =========================

/// GET /api/inbox/stats
pub async fn get_inbox_stats(State(state): State<AppState>) -> AppResult<Json<ApiResponse<InboxStats>>> {
    let stats = with_transaction(state.store.as_ref(), |tx| {
        Box::pin(async move { tx.inbox_stats().await })
    })
    .await?;

    Ok(Json(ApiResponse::ok("Inbox statistics", stats)))
}

/// GET /api/debug/scheduler/status
pub async fn get_scheduler_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.scheduler_metrics.get_status().await;

    Json(serde_json::json!({
        "success": true,
        "data": status
    }))
}

/// GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "order-service",
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::routes::create_app,
        repository::{MemoryOrderStore, OrderStore},
        utils::scheduler::SchedulerMetrics,
    };
    use axum::{body::Body, http::{Request, StatusCode}, Router};
    use bigdecimal::BigDecimal;
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    fn app() -> (Router, MemoryOrderStore) {
        let store = MemoryOrderStore::new();
        let state = AppState {
            store: Arc::new(store.clone()),
            scheduler_metrics: SchedulerMetrics::new(),
        };
        (create_app(state, Duration::from_secs(5)), store)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["service"], "order-service");
    }

    #[tokio::test]
    async fn test_inbox_stats_empty() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/api/inbox/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["total"], 0);
        assert_eq!(body["data"]["pending"], 0);
    }

    #[tokio::test]
    async fn test_get_order_with_history() {
        let (app, store) = app();
        let mut tx = store.begin().await.unwrap();
        let order = tx
            .create_order(&NewOrder {
                owner_id: Uuid::new_v4(),
                shop_id: Uuid::new_v4(),
                shipping_address_id: Uuid::new_v4(),
                promotion_id: None,
                shipping_fee: BigDecimal::from(20000),
                discount_amount: BigDecimal::from(0),
                status: OrderStatus::PendingPayment,
                items: vec![NewOrderItem {
                    product_id: Uuid::new_v4(),
                    quantity: 1,
                    unit_price: BigDecimal::from(230000),
                }],
            })
            .await
            .unwrap();
        tx.update_order_status(order.id, OrderStatus::Processing, Some("evt-1"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/orders/{}", order.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["status"], "PROCESSING");
        assert_eq!(body["data"]["history"][0]["event_id"], "evt-1");

        let missing = app
            .oneshot(
                Request::get(format!("/api/orders/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
