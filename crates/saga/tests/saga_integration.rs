//! Integration tests for the order saga against in-memory services.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{CustomerId, PaymentId, ProductId, Shutdown};
use domain::{Money, OrderStatus, PaymentStatus, Product};
use notify::{EventType, InMemoryBroker, NotificationPublisher, PublisherConfig};
use resilience::{CircuitBreakerConfig, ResilientCall, RetryPolicy};
use saga::{
    ChargeOutcome, ChargeRequest, ErrorKind, InMemoryInventoryService, InMemoryOrderService,
    InMemoryPaymentService, InconsistencyKind, InventoryClient, InventoryService, OrderClient,
    OrderSaga, OrderService, PaymentClient, PaymentService, PlaceOrder, SagaConfig, SagaError,
    SagaState, ServiceError,
};

const QUEUE: &str = "order-notifications";

fn laptop() -> Product {
    Product {
        id: ProductId::new(1),
        name: "Laptop".to_string(),
        description: "14 inch".to_string(),
        price: Money::from_cents(99_900),
        stock: 10,
    }
}

/// Inventory whose releases always fail.
struct FailingRelease(InMemoryInventoryService);

#[async_trait]
impl InventoryService for FailingRelease {
    async fn product(&self, product_id: ProductId) -> Result<Product, ServiceError> {
        self.0.product(product_id).await
    }

    async fn reserve(&self, product_id: ProductId, quantity: u32) -> Result<u32, ServiceError> {
        self.0.reserve(product_id, quantity).await
    }

    async fn release(&self, _product_id: ProductId, _quantity: u32) -> Result<u32, ServiceError> {
        Err(ServiceError::Transient("connection reset".to_string()))
    }
}

/// Payment service whose charges never answer.
struct StalledPayment(InMemoryPaymentService);

#[async_trait]
impl PaymentService for StalledPayment {
    async fn charge(&self, _request: &ChargeRequest) -> Result<domain::Payment, ServiceError> {
        std::future::pending().await
    }

    async fn payment(&self, payment_id: PaymentId) -> Result<domain::Payment, ServiceError> {
        self.0.payment(payment_id).await
    }

    async fn refund(&self, payment_id: PaymentId) -> Result<domain::Payment, ServiceError> {
        self.0.refund(payment_id).await
    }
}

struct TestHarness {
    saga: OrderSaga,
    inventory: InMemoryInventoryService,
    orders: InMemoryOrderService,
    payments: InMemoryPaymentService,
    broker: InMemoryBroker,
    _shutdown: Shutdown,
}

struct Builder {
    inventory: InMemoryInventoryService,
    orders: InMemoryOrderService,
    payments: InMemoryPaymentService,
    inventory_service: Option<Arc<dyn InventoryService>>,
    payment_service: Option<Arc<dyn PaymentService>>,
    inventory_call: ResilientCall,
    config: SagaConfig,
}

impl Builder {
    fn new() -> Self {
        let inventory = InMemoryInventoryService::new();
        inventory.insert_product(laptop());
        Self {
            inventory,
            orders: InMemoryOrderService::new(),
            payments: InMemoryPaymentService::new(),
            inventory_service: None,
            payment_service: None,
            inventory_call: ResilientCall::with_defaults(InventoryClient::SERVICE),
            config: SagaConfig::default(),
        }
    }

    fn failing_release(mut self) -> Self {
        self.inventory_service = Some(Arc::new(FailingRelease(self.inventory.clone())));
        self
    }

    fn stalled_payment(mut self) -> Self {
        self.payment_service = Some(Arc::new(StalledPayment(self.payments.clone())));
        self
    }

    fn inventory_call(mut self, call: ResilientCall) -> Self {
        self.inventory_call = call;
        self
    }

    fn config(mut self, config: SagaConfig) -> Self {
        self.config = config;
        self
    }

    async fn build(self) -> TestHarness {
        let shutdown = Shutdown::new();
        let broker = InMemoryBroker::new();
        let (publisher, _handle) = NotificationPublisher::start(
            broker.clone(),
            PublisherConfig::default(),
            shutdown.signal(),
        );
        publisher.wait_connected().await;

        let inventory_service = self
            .inventory_service
            .unwrap_or_else(|| Arc::new(self.inventory.clone()));
        let payment_service = self
            .payment_service
            .unwrap_or_else(|| Arc::new(self.payments.clone()));

        let saga = OrderSaga::new(
            InventoryClient::new(inventory_service, self.inventory_call),
            OrderClient::new(
                Arc::new(self.orders.clone()),
                ResilientCall::with_defaults(OrderClient::SERVICE),
            ),
            PaymentClient::new(
                payment_service,
                ResilientCall::with_defaults(PaymentClient::SERVICE),
            ),
            publisher,
            self.config,
        );

        TestHarness {
            saga,
            inventory: self.inventory,
            orders: self.orders,
            payments: self.payments,
            broker,
            _shutdown: shutdown,
        }
    }
}

impl TestHarness {
    async fn new() -> Self {
        Builder::new().build().await
    }

    fn stock(&self) -> u32 {
        self.inventory.stock(ProductId::new(1)).unwrap()
    }

    /// Waits until `count` notifications reached the broker.
    async fn notifications(&self, count: usize) -> Vec<EventType> {
        for _ in 0..100 {
            let events = self.broker.events(QUEUE);
            if events.len() >= count {
                return events.iter().map(|e| e.event_type()).collect();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} notifications, got {:?}", self.broker.events(QUEUE));
    }
}

fn order_of(quantity: i64) -> PlaceOrder {
    PlaceOrder::new(CustomerId::new(42), ProductId::new(1), quantity, "Credit Card")
}

#[tokio::test]
async fn test_happy_path_confirms_order() {
    let h = TestHarness::new().await;

    let report = h.saga.place_order(order_of(5)).await.unwrap();

    assert_eq!(report.state, SagaState::Confirmed);
    assert_eq!(report.order.status, OrderStatus::Confirmed);
    assert_eq!(report.order.product_name, "Laptop");
    assert_eq!(report.order.total_price, Money::from_cents(499_500));
    assert_eq!(report.payment.status, PaymentStatus::Success);
    assert_eq!(report.payment.amount, report.order.total_price);
    assert!(report.notification.is_enqueued());
    assert!(report.inconsistency.is_none());

    assert_eq!(h.stock(), 5);
    assert_eq!(
        h.orders.get(report.order.id).unwrap().status,
        OrderStatus::Confirmed
    );
    assert_eq!(h.notifications(1).await, vec![EventType::OrderConfirmed]);

    let event = &h.broker.events(QUEUE)[0];
    assert_eq!(event.correlation_id(), report.correlation_id);
    assert_eq!(event.payload()["quantity"], 5);
}

#[tokio::test]
async fn test_declined_payment_releases_stock_and_cancels_order() {
    let h = TestHarness::new().await;
    h.payments.script([ChargeOutcome::Decline]);

    let failure = h.saga.place_order(order_of(5)).await.unwrap_err();

    assert_eq!(failure.state, SagaState::Cancelled);
    assert_eq!(failure.kind(), ErrorKind::BusinessRejection);
    assert!(matches!(failure.error, SagaError::PaymentDeclined { .. }));
    assert!(failure.inconsistencies.is_empty());

    let order_id = failure.order_id.unwrap();
    assert_eq!(h.orders.get(order_id).unwrap().status, OrderStatus::Cancelled);
    assert_eq!(h.stock(), 10);

    let rows = h.payments.payments_for_order(order_id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, PaymentStatus::Failed);
    assert_eq!(failure.payment_id, Some(rows[0].id));

    assert_eq!(h.notifications(1).await, vec![EventType::OrderFailed]);
}

#[tokio::test]
async fn test_insufficient_stock_leaves_ledger_unchanged() {
    let h = TestHarness::new().await;

    let failure = h.saga.place_order(order_of(20)).await.unwrap_err();

    assert_eq!(failure.state, SagaState::Failed);
    assert!(matches!(
        failure.error,
        SagaError::InsufficientStock {
            available: 10,
            requested: 20,
            ..
        }
    ));
    assert_eq!(h.stock(), 10);
    assert!(h.orders.orders().is_empty());
    assert_eq!(h.payments.charge_calls(), 0);
}

#[tokio::test]
async fn test_unknown_product_fails_before_reservation() {
    let h = TestHarness::new().await;
    let request = PlaceOrder::new(CustomerId::new(1), ProductId::new(99), 1, "UPI");

    let failure = h.saga.place_order(request).await.unwrap_err();

    assert!(matches!(failure.error, SagaError::ProductNotFound(_)));
    assert_eq!(h.inventory.reserve_calls(), 0);
}

#[tokio::test]
async fn test_invalid_request_touches_nothing() {
    let h = TestHarness::new().await;
    let request = PlaceOrder {
        customer_id: Some(CustomerId::new(1)),
        ..PlaceOrder::default()
    };

    let failure = h.saga.place_order(request).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Validation);
    assert!(failure.error.to_string().contains("product_id"));
    assert!(failure.notification.is_none());
    assert_eq!(h.inventory.reserve_calls(), 0);
}

#[tokio::test]
async fn test_overflowing_total_price_fails_before_reservation() {
    let h = TestHarness::new().await;
    h.inventory.insert_product(Product {
        id: ProductId::new(2),
        name: "Yacht".to_string(),
        description: "Ocean going".to_string(),
        price: Money::from_cents(5_000_000_000),
        stock: 10,
    });
    let request = PlaceOrder::new(CustomerId::new(1), ProductId::new(2), 4_000_000_000, "UPI");

    let failure = h.saga.place_order(request).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Validation);
    assert!(failure.error.to_string().contains("overflows"));
    assert_eq!(failure.state, SagaState::Failed);
    assert_eq!(h.inventory.reserve_calls(), 0);
    assert_eq!(h.inventory.stock(ProductId::new(2)), Some(10));
    assert!(h.orders.orders().is_empty());
    assert_eq!(h.payments.charge_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_inventory_circuit_fails_fast() {
    let h = Builder::new()
        .inventory_call(ResilientCall::new(
            InventoryClient::SERVICE,
            CircuitBreakerConfig::new(1, Duration::from_secs(60)),
            RetryPolicy::no_retry(),
        ))
        .build()
        .await;
    h.inventory.set_unavailable(true);

    let first = h.saga.place_order(order_of(1)).await.unwrap_err();
    assert_eq!(first.kind(), ErrorKind::TransientDependency);

    h.inventory.set_unavailable(false);
    let second = h.saga.place_order(order_of(1)).await.unwrap_err();

    assert!(matches!(second.error, SagaError::ServiceDegraded { ref service } if service == "inventory"));
    assert_eq!(second.kind(), ErrorKind::CircuitOpen);
    assert_eq!(h.inventory.reserve_calls(), 0);
    assert_eq!(h.stock(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_confirm_failure_is_flagged_not_compensated() {
    let h = TestHarness::new().await;
    h.orders.fail_status_updates_to(OrderStatus::Confirmed);

    let report = h.saga.place_order(order_of(2)).await.unwrap();

    assert_eq!(report.state, SagaState::Confirmed);
    assert_eq!(report.order.status, OrderStatus::Pending);
    assert_eq!(report.payment.status, PaymentStatus::Success);
    let flagged = report.inconsistency.unwrap();
    assert_eq!(flagged.kind, InconsistencyKind::OrderNotConfirmed);
    assert_eq!(flagged.order_id, Some(report.order.id));

    assert_eq!(h.stock(), 8);
    assert_eq!(h.saga.inconsistencies().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_release_is_surfaced() {
    let h = Builder::new().failing_release().build().await;
    h.payments.script([ChargeOutcome::Decline]);

    let failure = h.saga.place_order(order_of(3)).await.unwrap_err();

    assert_eq!(failure.state, SagaState::Failed);
    assert_eq!(failure.kind(), ErrorKind::CompensationFailure);
    assert!(matches!(
        failure.error,
        SagaError::CompensationFailed {
            step: "release_stock",
            ..
        }
    ));
    assert_eq!(failure.order_status, Some(OrderStatus::Cancelled));
    assert_eq!(failure.inconsistencies.len(), 1);
    assert_eq!(
        failure.inconsistencies[0].kind,
        InconsistencyKind::StockNotReleased
    );
    assert_eq!(failure.inconsistencies[0].quantity, Some(3));
    assert_eq!(h.stock(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_failed_cancel_still_releases_stock() {
    let h = TestHarness::new().await;
    h.payments.script([ChargeOutcome::Decline]);
    h.orders.fail_status_updates_to(OrderStatus::Cancelled);

    let failure = h.saga.place_order(order_of(3)).await.unwrap_err();

    assert_eq!(failure.state, SagaState::Cancelled);
    assert!(matches!(failure.error, SagaError::PaymentDeclined { .. }));
    assert_eq!(failure.order_status, Some(OrderStatus::Pending));
    assert_eq!(failure.inconsistencies.len(), 1);
    assert_eq!(
        failure.inconsistencies[0].kind,
        InconsistencyKind::OrderNotCancelled
    );
    assert_eq!(failure.inconsistencies[0].order_id, failure.order_id);

    let order_id = failure.order_id.unwrap();
    assert_eq!(h.orders.get(order_id).unwrap().status, OrderStatus::Pending);
    assert_eq!(h.stock(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_compensates() {
    let h = Builder::new()
        .stalled_payment()
        .config(SagaConfig::default().with_step_timeout(Duration::from_secs(2)))
        .build()
        .await;

    let failure = h.saga.place_order(order_of(4)).await.unwrap_err();

    assert!(matches!(
        failure.error,
        SagaError::StepTimeout {
            step: "charge_payment",
            ..
        }
    ));
    assert_eq!(failure.state, SagaState::Cancelled);
    assert_eq!(failure.order_status, Some(OrderStatus::Cancelled));
    assert_eq!(h.stock(), 10);
    assert_eq!(
        failure.inconsistencies[0].kind,
        InconsistencyKind::StepOutcomeUnknown
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_still_compensates() {
    let h = Builder::new().stalled_payment().build().await;
    let caller = Shutdown::new();
    let signal = caller.signal();

    let saga = h.saga.clone();
    let running = tokio::spawn(async move { saga.place_order_with_cancel(order_of(4), signal).await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    caller.trigger();

    let failure = running.await.unwrap().unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Aborted);
    assert_eq!(failure.state, SagaState::Cancelled);
    assert_eq!(failure.order_status, Some(OrderStatus::Cancelled));
    assert_eq!(h.stock(), 10);
}

#[tokio::test]
async fn test_refund_cancels_order_and_releases_stock() {
    let h = TestHarness::new().await;
    let report = h.saga.place_order(order_of(5)).await.unwrap();
    assert_eq!(h.stock(), 5);

    let refund = h.saga.refund(report.payment.id).await.unwrap();

    assert_eq!(refund.payment.status, PaymentStatus::Refunded);
    assert_eq!(refund.order_id, report.order.id);
    assert_eq!(refund.order_status, OrderStatus::Cancelled);
    assert!(refund.stock_released);
    assert_eq!(h.stock(), 10);
    assert_eq!(
        h.notifications(2).await,
        vec![EventType::OrderConfirmed, EventType::PaymentRefunded]
    );
}

#[tokio::test(start_paused = true)]
async fn test_refund_with_failed_cancel_still_releases_stock() {
    let h = TestHarness::new().await;
    let report = h.saga.place_order(order_of(5)).await.unwrap();
    h.orders.fail_status_updates_to(OrderStatus::Cancelled);

    let refund = h.saga.refund(report.payment.id).await.unwrap();

    assert_eq!(refund.payment.status, PaymentStatus::Refunded);
    assert_eq!(refund.order_status, OrderStatus::Confirmed);
    assert!(refund.stock_released);
    assert_eq!(refund.inconsistencies.len(), 1);
    assert_eq!(
        refund.inconsistencies[0].kind,
        InconsistencyKind::OrderNotCancelled
    );
    assert_eq!(refund.inconsistencies[0].payment_id, Some(report.payment.id));
    assert_eq!(h.stock(), 10);
}

#[tokio::test]
async fn test_refund_of_shipped_order_keeps_stock() {
    let h = TestHarness::new().await;
    let report = h.saga.place_order(order_of(5)).await.unwrap();
    h.orders
        .update_status(report.order.id, OrderStatus::Shipped)
        .await
        .unwrap();

    let refund = h.saga.refund(report.payment.id).await.unwrap();

    assert_eq!(refund.payment.status, PaymentStatus::Refunded);
    assert_eq!(refund.order_status, OrderStatus::Shipped);
    assert!(!refund.stock_released);
    assert!(refund.inconsistencies.is_empty());
    assert_eq!(h.stock(), 5);
    assert_eq!(
        h.orders.get(report.order.id).unwrap().status,
        OrderStatus::Shipped
    );

    h.notifications(2).await;
    let event = &h.broker.events(QUEUE)[1];
    assert_eq!(event.event_type(), EventType::PaymentRefunded);
    assert_eq!(event.payload()["stock_released"], false);
    assert_eq!(event.payload()["customer_id"], 42);
}

#[tokio::test]
async fn test_second_refund_is_rejected_without_side_effects() {
    let h = TestHarness::new().await;
    let report = h.saga.place_order(order_of(5)).await.unwrap();
    h.saga.refund(report.payment.id).await.unwrap();

    let failure = h.saga.refund(report.payment.id).await.unwrap_err();

    assert!(matches!(failure.error, SagaError::InvalidState(_)));
    assert!(!failure.refunded);
    assert!(failure.notification.is_none());
    assert_eq!(h.stock(), 10);
}

#[tokio::test]
async fn test_declined_payment_cannot_be_refunded() {
    let h = TestHarness::new().await;
    h.payments.script([ChargeOutcome::Decline]);
    let failure = h.saga.place_order(order_of(1)).await.unwrap_err();

    let refund = h.saga.refund(failure.payment_id.unwrap()).await.unwrap_err();

    assert_eq!(refund.kind(), ErrorKind::Validation);
    assert_eq!(h.stock(), 10);
}

#[tokio::test]
async fn test_concurrent_orders_never_oversell() {
    let h = TestHarness::new().await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let saga = h.saga.clone();
        tasks.push(tokio::spawn(async move { saga.place_order(order_of(3)).await }));
    }

    let mut confirmed = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            confirmed += 1;
        }
    }

    assert_eq!(confirmed, 3);
    assert_eq!(h.stock(), 1);
}
