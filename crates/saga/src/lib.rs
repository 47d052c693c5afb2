//! Order saga orchestration.
//!
//! This crate coordinates an order across the inventory, order and payment
//! services without a distributed transaction.
//!
//! The order fulfillment saga follows these steps:
//! 1. Validate the request
//! 2. Look up the product
//! 3. Reserve stock
//! 4. Create the order as `PENDING`
//! 5. Charge the payment
//! 6. Confirm the order
//!
//! If a step after the reservation fails, completed steps are compensated in
//! reverse order. Every outbound call goes through a circuit breaker and a
//! bounded retry policy from the `resilience` crate.

pub mod coordinator;
pub mod error;
pub mod events;
pub mod inconsistency;
pub mod instance;
pub mod order_fulfillment;
pub mod request;
pub mod services;
pub mod state;

pub use coordinator::{OrderSaga, RefundFailure, RefundReport, SagaConfig, SagaFailure, SagaReport};
pub use error::{ErrorKind, Resource, SagaError, ServiceError};
pub use events::SagaEvent;
pub use inconsistency::{Inconsistency, InconsistencyKind, InconsistencyRegister};
pub use instance::SagaInstance;
pub use order_fulfillment::{Compensation, SagaStep};
pub use request::{PlaceOrder, ValidatedOrder};
pub use services::{
    ChargeOutcome, ChargeRequest, HttpEndpoint, HttpInventoryService, HttpOrderService,
    HttpPaymentService, HttpRecordService, InMemoryInventoryService, InMemoryOrderService,
    InMemoryPaymentService, InMemoryRecordService, InventoryClient, InventoryService,
    Observation, ObservationListing, ObservationRecorder, OrderClient, OrderService,
    PaymentClient, PaymentService, ReconcileReport, RecordOutcome, RecordService,
};
pub use state::SagaState;
