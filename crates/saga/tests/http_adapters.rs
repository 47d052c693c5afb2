//! HTTP adapters against a mock server.

use std::sync::Arc;
use std::time::Duration;

use common::{CustomerId, OrderId, PaymentId, ProductId, Shutdown};
use domain::{Money, OrderStatus, PaymentMethod, PaymentStatus};
use notify::{InMemoryBroker, NotificationPublisher, PublisherConfig};
use resilience::{CircuitBreakerConfig, ResilientCall, RetryPolicy};
use saga::{
    ChargeRequest, ErrorKind, HttpEndpoint, HttpInventoryService, HttpOrderService,
    HttpPaymentService, InventoryClient, OrderClient, OrderSaga, PaymentClient, PlaceOrder,
    SagaConfig, SagaError, SagaState,
};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint(server: &MockServer) -> HttpEndpoint {
    HttpEndpoint::new(server.uri(), Duration::from_secs(2)).unwrap()
}

fn quick_call(target: &str) -> ResilientCall {
    ResilientCall::new(
        target,
        CircuitBreakerConfig::default(),
        RetryPolicy::builder()
            .base_delay(Duration::from_millis(10))
            .build(),
    )
}

fn inventory(server: &MockServer) -> InventoryClient {
    InventoryClient::new(
        Arc::new(HttpInventoryService::new(endpoint(server))),
        quick_call(InventoryClient::SERVICE),
    )
}

fn orders(server: &MockServer) -> OrderClient {
    OrderClient::new(
        Arc::new(HttpOrderService::new(endpoint(server))),
        quick_call(OrderClient::SERVICE),
    )
}

fn payments(server: &MockServer) -> PaymentClient {
    PaymentClient::new(
        Arc::new(HttpPaymentService::new(endpoint(server))),
        quick_call(PaymentClient::SERVICE),
    )
}

fn product_body(stock: u32) -> serde_json::Value {
    json!({
        "id": 1,
        "name": "Laptop",
        "description": "14 inch",
        "price": 999.0,
        "stock": stock
    })
}

fn payment_body(id: i64, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "order_id": 11,
        "customer_id": 42,
        "amount": 1998.0,
        "payment_method": "Credit Card",
        "payment_gateway": "Stripe",
        "transaction_id": "TXN-1",
        "status": status
    })
}

#[tokio::test]
async fn test_product_lookup_reads_major_units() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(product_body(10)))
        .mount(&server)
        .await;

    let product = inventory(&server).product(ProductId::new(1)).await.unwrap();

    assert_eq!(product.name, "Laptop");
    assert_eq!(product.price, Money::from_cents(99_900));
    assert_eq!(product.stock, 10);
}

#[tokio::test]
async fn test_insufficient_stock_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/products/1/stock"))
        .and(body_json(json!({"quantity": 20})))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": "Insufficient stock", "available": 10})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = inventory(&server)
        .reserve(ProductId::new(1), 20)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SagaError::InsufficientStock {
            available: 10,
            requested: 20,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::BusinessRejection);
}

#[tokio::test]
async fn test_release_sends_negative_quantity() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/products/1/stock"))
        .and(body_json(json!({"quantity": -3})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"new_stock": 13})))
        .expect(1)
        .mount(&server)
        .await;

    let stock = inventory(&server)
        .release(ProductId::new(1), 3, &RetryPolicy::no_retry())
        .await
        .unwrap();

    assert_eq!(stock, 13);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders/11"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders/11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 11,
            "customer_id": 42,
            "product_id": 1,
            "product_name": "Laptop",
            "quantity": 2,
            "total_price": 1998.0,
            "status": "PENDING"
        })))
        .mount(&server)
        .await;

    let order = orders(&server).order(OrderId::new(11)).await.unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_price, Money::from_cents(199_800));
}

#[tokio::test]
async fn test_rejected_status_update_maps_to_invalid_state() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/orders/11/status"))
        .and(body_json(json!({"status": "CONFIRMED"})))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"error": "order is CANCELLED"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = orders(&server)
        .update_status(OrderId::new(11), OrderStatus::Confirmed)
        .await
        .unwrap_err();

    assert!(matches!(err, SagaError::InvalidState(ref msg) if msg.contains("CANCELLED")));
}

#[tokio::test]
async fn test_declined_charge_carries_payment_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(402).set_body_json(payment_body(7, "FAILED")))
        .expect(1)
        .mount(&server)
        .await;

    let request = ChargeRequest {
        order_id: OrderId::new(11),
        customer_id: CustomerId::new(42),
        amount: Money::from_cents(199_800),
        payment_method: PaymentMethod::new("Credit Card"),
    };
    let err = payments(&server).charge(&request).await.unwrap_err();

    assert!(matches!(
        err,
        SagaError::PaymentDeclined { payment_id, order_id }
            if payment_id == PaymentId::new(7) && order_id == OrderId::new(11)
    ));
}

#[tokio::test]
async fn test_payment_lookup_without_customer_leaves_it_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 5,
            "order_id": 11,
            "amount": 1998.0,
            "payment_method": "UPI",
            "status": "SUCCESS"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let payment = payments(&server).payment(PaymentId::new(5)).await.unwrap();

    assert_eq!(payment.customer_id, None);
    assert_eq!(payment.order_id, OrderId::new(11));
    assert_eq!(payment.status, PaymentStatus::Success);
}

#[tokio::test]
async fn test_connection_refused_exhausts_retries() {
    let endpoint = HttpEndpoint::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    let client = PaymentClient::new(
        Arc::new(HttpPaymentService::new(endpoint)),
        quick_call(PaymentClient::SERVICE),
    );

    let err = client.payment(PaymentId::new(1)).await.unwrap_err();

    assert!(matches!(err, SagaError::DependencyUnavailable { ref service, .. } if service == "payment"));
}

#[tokio::test]
async fn test_saga_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(product_body(10)))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/products/1/stock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"new_stock": 8})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(body_json(json!({
            "customer_id": 42,
            "product_id": 1,
            "product_name": "Laptop",
            "quantity": 2,
            "total_price": 1998.0
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 11,
            "customer_id": 42,
            "product_id": 1,
            "product_name": "Laptop",
            "quantity": 2,
            "total_price": 1998.0,
            "status": "PENDING"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(payment_body(7, "SUCCESS")))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/orders/11/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "CONFIRMED"})))
        .expect(1)
        .mount(&server)
        .await;

    let shutdown = Shutdown::new();
    let (publisher, _handle) = NotificationPublisher::start(
        InMemoryBroker::new(),
        PublisherConfig::default(),
        shutdown.signal(),
    );
    publisher.wait_connected().await;
    let saga = OrderSaga::new(
        inventory(&server),
        orders(&server),
        payments(&server),
        publisher,
        SagaConfig::default(),
    );

    let report = saga
        .place_order(PlaceOrder::new(
            CustomerId::new(42),
            ProductId::new(1),
            2,
            "Credit Card",
        ))
        .await
        .unwrap();

    assert_eq!(report.state, SagaState::Confirmed);
    assert_eq!(report.order.id, OrderId::new(11));
    assert_eq!(report.order.status, OrderStatus::Confirmed);
    assert_eq!(report.payment.status, PaymentStatus::Success);
}
