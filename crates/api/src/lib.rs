//! HTTP API server for the resilient order saga.
//!
//! Exposes order placement, refunds and observation recording, with
//! structured logging (tracing), Prometheus metrics, and a health endpoint
//! reporting circuit and broker state.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use common::ShutdownSignal;
use metrics_exporter_prometheus::PrometheusHandle;
use notify::{BrokerConnector, NotificationPublisher, PublisherHandle};
use resilience::ResilientCall;
use saga::{
    HttpEndpoint, HttpInventoryService, HttpOrderService, HttpPaymentService, HttpRecordService,
    InMemoryInventoryService, InMemoryOrderService, InMemoryPaymentService, InMemoryRecordService,
    InventoryClient, InventoryService, ObservationRecorder, OrderClient, OrderSaga, OrderService,
    PaymentClient, PaymentService, RecordService,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
#[derive(Debug)]
pub struct AppState {
    pub saga: OrderSaga,
    pub recorder: ObservationRecorder,
}

/// Transports to the downstream services.
pub struct Backends {
    pub inventory: Arc<dyn InventoryService>,
    pub orders: Arc<dyn OrderService>,
    pub payments: Arc<dyn PaymentService>,
    pub records: Arc<dyn RecordService>,
}

impl Backends {
    /// HTTP transports for every configured URL, in-memory ones otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let endpoint = |url: &str| HttpEndpoint::new(url, config.http_timeout);

        let inventory: Arc<dyn InventoryService> = match &config.product_service_url {
            Some(url) => Arc::new(HttpInventoryService::new(endpoint(url)?)),
            None => {
                tracing::warn!("PRODUCT_SERVICE_URL not set, using in-memory inventory");
                Arc::new(InMemoryInventoryService::new())
            }
        };
        let orders: Arc<dyn OrderService> = match &config.order_service_url {
            Some(url) => Arc::new(HttpOrderService::new(endpoint(url)?)),
            None => {
                tracing::warn!("ORDER_SERVICE_URL not set, using in-memory orders");
                Arc::new(InMemoryOrderService::new())
            }
        };
        let payments: Arc<dyn PaymentService> = match &config.payment_service_url {
            Some(url) => Arc::new(HttpPaymentService::new(endpoint(url)?)),
            None => {
                tracing::warn!("PAYMENT_SERVICE_URL not set, using in-memory payments");
                Arc::new(InMemoryPaymentService::new())
            }
        };
        let records: Arc<dyn RecordService> = match &config.record_service_url {
            Some(url) => Arc::new(HttpRecordService::new(endpoint(url)?)),
            None => {
                tracing::warn!("RECORD_SERVICE_URL not set, using in-memory records");
                Arc::new(InMemoryRecordService::new())
            }
        };

        Ok(Self {
            inventory,
            orders,
            payments,
            records,
        })
    }
}

/// Wires the saga, the observation recorder and the notification publisher.
///
/// Each downstream dependency gets its own [`ResilientCall`], shared by every
/// request. The publisher's background tasks stop when `shutdown` fires.
pub fn create_state<C: BrokerConnector>(
    config: &Config,
    backends: Backends,
    connector: C,
    shutdown: ShutdownSignal,
) -> (Arc<AppState>, PublisherHandle) {
    let call = |target: &str| {
        ResilientCall::new(target, config.breaker_config(), config.retry_policy())
    };

    let (publisher, handle) =
        NotificationPublisher::start(connector, config.publisher_config(), shutdown);

    let saga = OrderSaga::new(
        InventoryClient::new(backends.inventory, call(InventoryClient::SERVICE)),
        OrderClient::new(backends.orders, call(OrderClient::SERVICE)),
        PaymentClient::new(backends.payments, call(PaymentClient::SERVICE)),
        publisher,
        config.saga_config(),
    );
    let recorder = ObservationRecorder::new(backends.records, call(ObservationRecorder::SERVICE));

    (Arc::new(AppState { saga, recorder }), handle)
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::place))
        .route("/payments/{id}/refund", post(routes::payments::refund))
        .route(
            "/observations",
            post(routes::observations::record).get(routes::observations::list),
        )
        .route(
            "/observations/reconcile",
            post(routes::observations::reconcile),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
