// /shop-platform/services/payment-service/src/api/handlers.rs

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use uuid::Uuid;

use crate::{
    models::*,
    repository::with_transaction,
    utils::error::{AppError, AppResult},
    AppState,
};

const USER_ID_HEADER: &str = "x-user-id";

fn user_id_from_headers(headers: &HeaderMap) -> AppResult<Uuid> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Decode("X-User-Id header tidak ada".to_string()))?;

    Uuid::parse_str(raw.trim()).map_err(|e| AppError::Decode(format!("invalid X-User-Id: {}", e)))
}

// ========================= PAYMENT HANDLERS =========================

/// Handler untuk memulai pembayaran
/// POST /api/payments
pub async fn initiate_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<InitiatePaymentRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<InitiatePaymentResponse>>)> {
    let user_id = user_id_from_headers(&headers)?;
    let order_id = payload.order_id;

    let response = state.coordinator.initiate_payment(user_id, payload).await?;

    tracing::info!(%order_id, payment_id = %response.payment_id, %user_id, "Payment initiated");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("Pembayaran berhasil dibuat", response)),
    ))
}

/// Gateway IPN callback
/// POST /api/payments/ipn/{provider}
pub async fn handle_ipn(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    body: Bytes,
) -> AppResult<Json<ApiResponse<IpnAck>>> {
    tracing::info!(%provider, bytes = body.len(), "Processing IPN");

    let ack = state.coordinator.handle_ipn(&provider, &body).await?;

    Ok(Json(ApiResponse::ok(
        if ack.applied {
            "IPN berhasil diproses"
        } else {
            "IPN sudah diproses sebelumnya"
        },
        ack,
    )))
}

/// Handler untuk refund
/// POST /api/payments/{id}/refund
pub async fn request_refund(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<RefundRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Refund>>)> {
    let refund = state.coordinator.request_refund(payment_id, payload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok("Refund sedang diproses", refund)),
    ))
}

/// GET /internal/payments/orders/{order_id}/status
pub async fn get_order_payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<OrderPaymentStatus>> {
    let status = state.coordinator.payment_status_for_order(order_id).await?;
    Ok(Json(status))
}

// ========================= MONITORING HANDLERS =========================

/// GET /api/outbox/stats
pub async fn get_outbox_stats(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<OutboxStats>>> {
    let store = state.coordinator.store();
    let stats = with_transaction(store.as_ref(), |tx| {
        Box::pin(async move { tx.outbox_stats().await })
    })
    .await?;

    Ok(Json(ApiResponse::ok("Outbox statistics", stats)))
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
        "service": "payment-service",
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
        config::MomoConfig,
        core::{
            coordinator::{CoordinatorConfig, PaymentCoordinator},
            momo::MomoProvider,
            provider::{PaymentGateway, ProviderRegistry},
        },
        repository::MemoryPaymentStore,
        utils::scheduler::SchedulerMetrics,
    };
    use axum::{body::Body, http::Request, Router};
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    fn app(gateway_url: &str) -> (Router, MemoryPaymentStore) {
        let provider = MomoProvider::new(MomoConfig {
            endpoint: format!("{}/create", gateway_url),
            refund_endpoint: format!("{}/refund", gateway_url),
            query_endpoint: format!("{}/query", gateway_url),
            partner_code: "MOMO".to_string(),
            access_key: "access".to_string(),
            secret_key: "secret".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        let store = MemoryPaymentStore::new();
        let coordinator = PaymentCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(ProviderRegistry::new().with(PaymentGateway::Momo(provider))),
            CoordinatorConfig {
                currency: "VND".to_string(),
                default_provider: "MOMO".to_string(),
                api_gateway_url: "http://localhost:3003".to_string(),
                redirect_url: "http://localhost:3000/payment/result".to_string(),
            },
        );
        let state = AppState {
            coordinator: Arc::new(coordinator),
            scheduler_metrics: SchedulerMetrics::new(),
        };
        (create_app(state, Duration::from_secs(5)), store)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn initiate_body(order_id: Uuid) -> Body {
        Body::from(
            serde_json::json!({
                "order_id": order_id,
                "method": "E_WALLET",
                "amount": "150000"
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app("http://127.0.0.1:9");
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_initiate_requires_user_header() {
        let (app, store) = app("http://127.0.0.1:9");
        let response = app
            .oneshot(
                Request::post("/api/payments")
                    .header("content-type", "application/json")
                    .body(initiate_body(Uuid::new_v4()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.payments().await.is_empty());
    }

    #[tokio::test]
    async fn test_initiate_returns_pay_url() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/create")
            .with_status(200)
            .with_body(r#"{"resultCode":0,"message":"Successful.","payUrl":"https://pay.test/abc"}"#)
            .create_async()
            .await;
        let (app, _) = app(&server.url());

        let response = app
            .oneshot(
                Request::post("/api/payments")
                    .header("content-type", "application/json")
                    .header("x-user-id", Uuid::new_v4().to_string())
                    .body(initiate_body(Uuid::new_v4()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["data"]["pay_url"], "https://pay.test/abc");
        assert_eq!(body["data"]["status"], "PROCESSING");
    }

    #[tokio::test]
    async fn test_ipn_with_bad_signature_is_rejected() {
        let (app, _) = app("http://127.0.0.1:9");
        let ipn = serde_json::json!({
            "partnerCode": "MOMO",
            "orderId": format!("{}_req", Uuid::new_v4()),
            "requestId": "req",
            "amount": 1000,
            "transId": 1,
            "resultCode": 0,
            "responseTime": 1,
            "signature": "00"
        });
        let response = app
            .oneshot(
                Request::post("/api/payments/ipn/momo")
                    .header("content-type", "application/json")
                    .body(Body::from(ipn.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error_code"], "INVALID_SIGNATURE");
    }

    #[tokio::test]
    async fn test_unknown_provider_and_order() {
        let (app, _) = app("http://127.0.0.1:9");
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/payments/ipn/zalopay")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let uri = format!("/internal/payments/orders/{}/status", Uuid::new_v4());
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_outbox_stats_empty() {
        let (app, _) = app("http://127.0.0.1:9");
        let response = app
            .oneshot(Request::get("/api/outbox/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["total"], 0);
    }
}
