// /shop-platform/e2e/tests/pipeline.rs

use bigdecimal::BigDecimal;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use e2e::CoordinatorStatusSource;
use event_bus::{
    poll_once, EventEnvelope, EventProducer, EventType, MemoryBus, MemoryConsumer, PollOutcome,
    ORDER_SERVICE_GROUP, PAYMENT_EVENTS_TOPIC,
};
use order_service::{
    core::InboxIngestor,
    models::{InboxEvent, InboxQueue, InboxStatus, NewOrder, NewOrderItem, OrderStatus},
    repository::{MemoryOrderStore, OrderStore},
    workers::{reconcile_event_id, InboxProcessor, OrderReconciler},
};
use payment_service::{
    config::MomoConfig,
    core::{
        coordinator::{CoordinatorConfig, PaymentCoordinator},
        events::payment_event_id,
        momo::{MomoIpnRequest, MomoProvider},
        provider::{PaymentGateway, ProviderRegistry},
    },
    models::{InitiatePaymentRequest, OutboxStatus, Payment, PaymentMethod, PaymentStatus, RefundRequest},
    repository::MemoryPaymentStore,
    utils::error::AppError as PaymentError,
    workers::OutboxPublisher,
};

const MAX_RETRY: i32 = 5;
const BATCH: i64 = 500;

/// Both services wired through one in-memory bus and a fake MoMo gateway
struct Pipeline {
    gateway: mockito::ServerGuard,
    momo: MomoProvider,
    payments: MemoryPaymentStore,
    coordinator: Arc<PaymentCoordinator>,
    bus: MemoryBus,
    consumer: MemoryConsumer,
    orders: MemoryOrderStore,
    ingestor: InboxIngestor,
    fresh: InboxProcessor,
    retry: InboxProcessor,
    cancel: CancellationToken,
}

impl Pipeline {
    async fn new() -> Self {
        let mut gateway = mockito::Server::new_async().await;
        gateway
            .mock("POST", "/create")
            .with_status(200)
            .with_body(r#"{"resultCode":0,"message":"Successful.","payUrl":"https://pay.test/checkout"}"#)
            .create_async()
            .await;

        let momo = MomoProvider::new(MomoConfig {
            endpoint: format!("{}/create", gateway.url()),
            refund_endpoint: format!("{}/refund", gateway.url()),
            query_endpoint: format!("{}/query", gateway.url()),
            partner_code: "MOMO".to_string(),
            access_key: "access".to_string(),
            secret_key: "secret".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();

        let payments = MemoryPaymentStore::new();
        let coordinator = Arc::new(PaymentCoordinator::new(
            Arc::new(payments.clone()),
            Arc::new(ProviderRegistry::new().with(PaymentGateway::Momo(momo.clone()))),
            CoordinatorConfig {
                currency: "VND".to_string(),
                default_provider: "MOMO".to_string(),
                api_gateway_url: "https://api.shop.test".to_string(),
                redirect_url: "https://shop.test/payment/result".to_string(),
            },
        ));

        let bus = MemoryBus::new(4);
        let consumer = bus.subscribe(PAYMENT_EVENTS_TOPIC, ORDER_SERVICE_GROUP);

        let orders = MemoryOrderStore::new();
        let order_store: Arc<dyn OrderStore> = Arc::new(orders.clone());

        Self {
            gateway,
            momo,
            payments,
            coordinator,
            bus,
            consumer,
            ingestor: InboxIngestor::new(order_store.clone(), MAX_RETRY),
            fresh: InboxProcessor::new(order_store.clone(), InboxQueue::Fresh, BATCH),
            retry: InboxProcessor::new(order_store, InboxQueue::Retry, BATCH),
            orders,
            cancel: CancellationToken::new(),
        }
    }

    fn publisher(&self) -> OutboxPublisher {
        OutboxPublisher::new(
            Arc::new(self.payments.clone()),
            Arc::new(self.bus.clone()),
            BATCH,
            MAX_RETRY,
        )
    }

    fn reconciler(&self) -> OrderReconciler {
        OrderReconciler::new(
            Arc::new(self.orders.clone()),
            Arc::new(CoordinatorStatusSource::new(self.coordinator.clone())),
            chrono::Duration::minutes(15),
            BATCH,
            MAX_RETRY,
        )
    }

    /// Checkout hands the order over in PENDING_PAYMENT
    async fn place_order(&self, amount: i64) -> Uuid {
        let mut tx = self.orders.begin().await.unwrap();
        let order = tx
            .create_order(&NewOrder {
                owner_id: Uuid::new_v4(),
                shop_id: Uuid::new_v4(),
                shipping_address_id: Uuid::new_v4(),
                promotion_id: None,
                shipping_fee: BigDecimal::from(0),
                discount_amount: BigDecimal::from(0),
                status: OrderStatus::PendingPayment,
                items: vec![NewOrderItem {
                    product_id: Uuid::new_v4(),
                    quantity: 1,
                    unit_price: BigDecimal::from(amount),
                }],
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        order.id
    }

    async fn initiate(&self, order_id: Uuid, amount: i64) -> Payment {
        self.coordinator
            .initiate_payment(
                Uuid::new_v4(),
                InitiatePaymentRequest {
                    order_id,
                    method: PaymentMethod::EWallet,
                    amount: BigDecimal::from(amount),
                    provider: None,
                    order_info: None,
                },
            )
            .await
            .unwrap();
        self.payment(order_id).await
    }

    async fn payment(&self, order_id: Uuid) -> Payment {
        self.payments
            .payments()
            .await
            .into_iter()
            .find(|p| p.order_id == order_id)
            .unwrap()
    }

    /// IPN body as the gateway would send it
    fn ipn(&self, payment: &Payment, result_code: i64) -> Vec<u8> {
        let mut ipn = MomoIpnRequest {
            partner_code: "MOMO".to_string(),
            order_id: payment.provider_order_ref.clone().unwrap(),
            request_id: "r1".to_string(),
            amount: 250000,
            order_info: "Thanh toan".to_string(),
            order_type: "momo_wallet".to_string(),
            trans_id: 99,
            result_code,
            message: "Successful.".to_string(),
            pay_type: "qr".to_string(),
            response_time: 1_700_000_000_000,
            extra_data: String::new(),
            signature: String::new(),
        };
        ipn.signature = self.momo.sign_ipn(&ipn).unwrap();
        serde_json::to_vec(&ipn).unwrap()
    }

    /// Consume until the group has nothing left
    async fn drain(&mut self) -> usize {
        let mut committed = 0;
        loop {
            match poll_once(&mut self.consumer, &self.ingestor, Duration::from_millis(10))
                .await
                .unwrap()
            {
                PollOutcome::Committed => committed += 1,
                PollOutcome::Idle => return committed,
                PollOutcome::Rejected => panic!("ingestor rejected a record"),
            }
        }
    }

    /// publish outbox -> consume -> apply inbox
    async fn pump(&mut self) {
        self.publisher().run_once(&self.cancel).await.unwrap();
        self.drain().await;
        self.fresh.run_once(&self.cancel).await.unwrap();
    }

    async fn inbox_rows(&self, event_id: &str) -> Vec<InboxEvent> {
        self.orders
            .inbox()
            .await
            .into_iter()
            .filter(|e| e.event_id == event_id)
            .collect()
    }

    async fn order_status(&self, order_id: Uuid) -> OrderStatus {
        self.orders.order(order_id).await.unwrap().status
    }
}

#[tokio::test]
async fn happy_path_moves_order_to_processing_once() {
    let mut p = Pipeline::new().await;
    let order_id = p.place_order(250000).await;
    let payment = p.initiate(order_id, 250000).await;
    assert_eq!(payment.status, PaymentStatus::Processing);

    let ack = p.coordinator.handle_ipn("momo", &p.ipn(&payment, 0)).await.unwrap();
    assert!(ack.applied);
    assert_eq!(ack.status, PaymentStatus::Success);

    let payment = p.payment(order_id).await;
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.provider_txn_id.as_deref(), Some("99"));

    let event_id = payment_event_id(payment.id, PaymentStatus::Success);
    let events = p.payments.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, event_id);
    assert_eq!(events[0].event_type, EventType::PaymentSuccess);
    assert_eq!(events[0].status, OutboxStatus::Pending);

    p.pump().await;

    assert_eq!(p.payments.events().await[0].status, OutboxStatus::Sent);
    let inbox = p.inbox_rows(&event_id).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].status, InboxStatus::Processed);
    assert_eq!(p.order_status(order_id).await, OrderStatus::Processing);

    let history = p.orders.history(order_id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_status, OrderStatus::PendingPayment);
    assert_eq!(history[0].to_status, OrderStatus::Processing);
    assert_eq!(history[0].event_id.as_deref(), Some(event_id.as_str()));
}

#[tokio::test]
async fn duplicate_ipn_and_redelivery_change_nothing() {
    let mut p = Pipeline::new().await;
    let order_id = p.place_order(250000).await;
    let payment = p.initiate(order_id, 250000).await;
    let body = p.ipn(&payment, 0);

    p.coordinator.handle_ipn("momo", &body).await.unwrap();
    p.pump().await;
    let payment_after_first = p.payment(order_id).await;

    let replay = p.coordinator.handle_ipn("momo", &body).await.unwrap();
    assert!(!replay.applied);
    assert_eq!(p.payment(order_id).await, payment_after_first);
    assert_eq!(p.payments.events().await.len(), 1);

    // the bus delivers at least once; push the same record through again
    let event = p.payments.events().await.remove(0);
    p.bus
        .publish(PAYMENT_EVENTS_TOPIC, &order_id.to_string(), &event.payload)
        .await
        .unwrap();
    assert_eq!(p.drain().await, 1);
    p.fresh.run_once(&p.cancel).await.unwrap();

    assert_eq!(p.inbox_rows(&event.event_id).await.len(), 1);
    assert_eq!(p.orders.history(order_id).await.len(), 1);
    assert_eq!(p.order_status(order_id).await, OrderStatus::Processing);
}

#[tokio::test]
async fn tampered_ipn_is_rejected_without_side_effects() {
    let p = Pipeline::new().await;
    let order_id = p.place_order(250000).await;
    let payment = p.initiate(order_id, 250000).await;

    let mut ipn: serde_json::Value = serde_json::from_slice(&p.ipn(&payment, 0)).unwrap();
    let signature = ipn["signature"].as_str().unwrap().to_string();
    let flipped = if signature.starts_with('0') { "1" } else { "0" };
    ipn["signature"] = serde_json::Value::String(format!("{}{}", flipped, &signature[1..]));

    let err = p
        .coordinator
        .handle_ipn("momo", &serde_json::to_vec(&ipn).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Signature(_)));

    assert_eq!(p.payment(order_id).await, payment);
    assert!(p.payments.events().await.is_empty());
}

#[tokio::test]
async fn outbox_survives_publisher_crash() {
    let mut p = Pipeline::new().await;
    let order_id = p.place_order(250000).await;
    let payment = p.initiate(order_id, 250000).await;
    p.coordinator.handle_ipn("momo", &p.ipn(&payment, 0)).await.unwrap();

    // process died before any publisher tick: the row is still waiting
    assert_eq!(p.payments.events().await[0].status, OutboxStatus::Pending);
    assert_eq!(p.bus.topic_len(PAYMENT_EVENTS_TOPIC), 0);
    assert_eq!(p.order_status(order_id).await, OrderStatus::PendingPayment);

    // a fresh publisher after restart picks it up
    let stats = p.publisher().run_once(&p.cancel).await.unwrap();
    assert_eq!(stats.sent, 1);
    p.drain().await;
    p.fresh.run_once(&p.cancel).await.unwrap();

    assert_eq!(p.payments.events().await[0].status, OutboxStatus::Sent);
    assert_eq!(p.order_status(order_id).await, OrderStatus::Processing);
}

#[tokio::test]
async fn inbox_recovers_from_failure_spike() {
    let mut p = Pipeline::new().await;

    let mut order_ids = Vec::new();
    for _ in 0..100 {
        let order_id = p.place_order(250000).await;
        let envelope = EventEnvelope::new(
            Uuid::new_v4().to_string(),
            EventType::PaymentSuccess,
            order_id,
            Uuid::new_v4(),
            serde_json::json!({ "status": "SUCCESS" }),
        );
        p.bus
            .publish(PAYMENT_EVENTS_TOPIC, &envelope.key(), &envelope.to_bytes().unwrap())
            .await
            .unwrap();
        order_ids.push(order_id);
    }
    assert_eq!(p.drain().await, 100);

    p.orders.fail_updates_per_order(3);
    let first = p.fresh.run_once(&p.cancel).await.unwrap();
    assert_eq!(first.failed, 100);
    for _ in 0..2 {
        assert_eq!(p.retry.run_once(&p.cancel).await.unwrap().failed, 100);
    }
    let last = p.retry.run_once(&p.cancel).await.unwrap();
    assert_eq!(last.applied, 100);

    let inbox = p.orders.inbox().await;
    assert_eq!(inbox.len(), 100);
    assert!(inbox.iter().all(|e| e.status == InboxStatus::Processed));
    assert!(inbox.iter().all(|e| e.retry_count <= 3));

    for order_id in order_ids {
        assert_eq!(p.order_status(order_id).await, OrderStatus::Processing);
        assert_eq!(p.orders.history(order_id).await.len(), 1);
    }
}

#[tokio::test]
async fn reconciler_rescues_lost_event_and_late_original_is_noop() {
    let mut p = Pipeline::new().await;
    let order_id = p.place_order(250000).await;
    let payment = p.initiate(order_id, 250000).await;
    p.coordinator.handle_ipn("momo", &p.ipn(&payment, 0)).await.unwrap();

    // the outbox row never makes it out
    let original = p.payments.events().await.remove(0);
    assert!(p.payments.delete_payment_event(&original.event_id).await);
    p.pump().await;
    assert_eq!(p.order_status(order_id).await, OrderStatus::PendingPayment);

    p.orders
        .backdate_order(order_id, chrono::Utc::now() - chrono::Duration::minutes(20))
        .await;
    let reconciler = p.reconciler();
    let stats = reconciler.run_once(&p.cancel).await.unwrap();
    assert_eq!(stats.synthesized, 1);

    let synthesized_id = reconcile_event_id(order_id, "SUCCESS");
    assert_eq!(p.inbox_rows(&synthesized_id).await.len(), 1);

    p.fresh.run_once(&p.cancel).await.unwrap();
    assert_eq!(p.order_status(order_id).await, OrderStatus::Processing);
    assert_eq!(p.inbox_rows(&synthesized_id).await[0].status, InboxStatus::Processed);

    // order is no longer stale-pending, a second pass finds nothing
    assert_eq!(reconciler.run_once(&p.cancel).await.unwrap().checked, 0);

    // the original shows up late
    p.bus
        .publish(PAYMENT_EVENTS_TOPIC, &order_id.to_string(), &original.payload)
        .await
        .unwrap();
    p.drain().await;
    p.fresh.run_once(&p.cancel).await.unwrap();

    let late = p.inbox_rows(&original.event_id).await;
    assert_eq!(late.len(), 1);
    assert_eq!(late[0].status, InboxStatus::Processed);
    assert_eq!(p.order_status(order_id).await, OrderStatus::Processing);

    let history = p.orders.history(order_id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_id.as_deref(), Some(synthesized_id.as_str()));
    assert!(p.payments.events().await.is_empty());
}

#[tokio::test]
async fn failed_payment_reaches_order() {
    let mut p = Pipeline::new().await;
    let order_id = p.place_order(250000).await;
    let payment = p.initiate(order_id, 250000).await;

    p.coordinator.handle_ipn("momo", &p.ipn(&payment, 1006)).await.unwrap();
    assert_eq!(p.payment(order_id).await.status, PaymentStatus::Failed);

    p.pump().await;
    assert_eq!(p.order_status(order_id).await, OrderStatus::PaymentFailed);
}

#[tokio::test]
async fn refund_flows_through_to_order() {
    let mut p = Pipeline::new().await;
    p.gateway
        .mock("POST", "/refund")
        .with_status(200)
        .with_body(r#"{"resultCode":0,"message":"Successful.","transId":555}"#)
        .create_async()
        .await;

    let order_id = p.place_order(250000).await;
    let payment = p.initiate(order_id, 250000).await;
    p.coordinator.handle_ipn("momo", &p.ipn(&payment, 0)).await.unwrap();
    p.pump().await;
    assert_eq!(p.order_status(order_id).await, OrderStatus::Processing);

    let refund = p
        .coordinator
        .request_refund(payment.id, RefundRequest { amount: None, reason: Some("damaged".to_string()) })
        .await
        .unwrap();
    p.pump().await;
    // REFUND_REQUESTED is acknowledged without touching the order
    assert_eq!(p.order_status(order_id).await, OrderStatus::Processing);

    p.coordinator.process_refund(refund.id).await.unwrap();
    assert_eq!(p.payment(order_id).await.status, PaymentStatus::Refunded);
    p.pump().await;

    assert_eq!(p.order_status(order_id).await, OrderStatus::Refunded);
    assert!(p.orders.inbox().await.iter().all(|e| e.status == InboxStatus::Processed));
    assert_eq!(p.orders.history(order_id).await.len(), 2);
}
