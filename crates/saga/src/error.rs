//! Saga error types.
//!
//! Two layers: [`ServiceError`] is what a service adapter reports for one
//! request, [`SagaError`] is what the saga reasons about after the client
//! wrapped the request in a [`ResilientCall`](resilience::ResilientCall).
//! Raw transport errors never reach the coordinator.

use std::time::Duration;

use common::{OrderId, PaymentId, ProductId};
use domain::Payment;
use resilience::{CallError, Classify};
use thiserror::Error;

/// The entity a not-found response refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Product(ProductId),
    Order(OrderId),
    Payment(PaymentId),
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Product(id) => write!(f, "product {id}"),
            Resource::Order(id) => write!(f, "order {id}"),
            Resource::Payment(id) => write!(f, "payment {id}"),
        }
    }
}

/// Outcome of a single request to a downstream service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The service rejected the request as malformed (400).
    #[error("Invalid request: {0}")]
    Validation(String),

    /// 404.
    #[error("{0} not found")]
    NotFound(Resource),

    /// The reservation would drive stock negative.
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    /// The payment was declined (402); the failed payment row is attached.
    #[error("Payment {} declined", .0.id)]
    Declined(Box<Payment>),

    /// The entity is not in a state that permits the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Network failure, timeout or 5xx.
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl Classify for ServiceError {
    fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }
}

/// Error taxonomy the saga and its callers reason in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller defect; never retried, never counted against circuit health.
    Validation,
    /// Expected business outcome such as insufficient stock or a declined payment.
    BusinessRejection,
    /// Network, timeout or 5xx after retries.
    TransientDependency,
    /// The dependency's circuit is open; the service is degraded.
    CircuitOpen,
    /// A compensating action could not complete; the ledger may have drifted.
    CompensationFailure,
    /// The caller abandoned the saga.
    Aborted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::BusinessRejection => "business_rejection",
            ErrorKind::TransientDependency => "transient_dependency",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::CompensationFailure => "compensation_failure",
            ErrorKind::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors surfaced by the order saga and its clients.
#[derive(Debug, Clone, Error)]
pub enum SagaError {
    /// The request is missing fields or has out-of-range values.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Product {0} not found")]
    ProductNotFound(ProductId),

    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    #[error("Payment {0} not found")]
    PaymentNotFound(PaymentId),

    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    #[error("Payment {payment_id} for order {order_id} was declined")]
    PaymentDeclined {
        order_id: OrderId,
        payment_id: PaymentId,
    },

    /// The operation is not allowed in the entity's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The dependency's circuit is open; no request was made.
    #[error("{service} service degraded: circuit open")]
    ServiceDegraded { service: String },

    /// The dependency kept failing until retries ran out.
    #[error("{service} service unavailable: {reason}")]
    DependencyUnavailable { service: String, reason: String },

    /// A step did not finish within the per-step timeout.
    #[error("Step '{step}' timed out after {}s", .timeout.as_secs())]
    StepTimeout {
        step: &'static str,
        timeout: Duration,
    },

    /// A compensating action could not complete after exhausting retries.
    #[error("Compensation '{step}' failed for order {order_id:?}: {reason}")]
    CompensationFailed {
        step: &'static str,
        order_id: Option<OrderId>,
        reason: String,
    },

    /// The saga was cancelled by its caller.
    #[error("Saga cancelled during step '{step}'")]
    Cancelled { step: &'static str },
}

impl SagaError {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::InvalidRequest(_) | SagaError::InvalidState(_) => ErrorKind::Validation,
            SagaError::ProductNotFound(_)
            | SagaError::OrderNotFound(_)
            | SagaError::PaymentNotFound(_)
            | SagaError::InsufficientStock { .. }
            | SagaError::PaymentDeclined { .. } => ErrorKind::BusinessRejection,
            SagaError::ServiceDegraded { .. } => ErrorKind::CircuitOpen,
            SagaError::DependencyUnavailable { .. } | SagaError::StepTimeout { .. } => {
                ErrorKind::TransientDependency
            }
            SagaError::CompensationFailed { .. } => ErrorKind::CompensationFailure,
            SagaError::Cancelled { .. } => ErrorKind::Aborted,
        }
    }

    /// Translates the result of a protected call to `service` into the taxonomy.
    pub(crate) fn from_call(service: &str, err: CallError<ServiceError>) -> Self {
        match err {
            CallError::CircuitOpen { .. } => SagaError::ServiceDegraded {
                service: service.to_string(),
            },
            CallError::ExhaustedRetries { last, .. } => SagaError::DependencyUnavailable {
                service: service.to_string(),
                reason: last.to_string(),
            },
            CallError::Rejected(err) => SagaError::from_rejection(service, err),
        }
    }

    fn from_rejection(service: &str, err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => SagaError::InvalidRequest(msg),
            ServiceError::NotFound(Resource::Product(id)) => SagaError::ProductNotFound(id),
            ServiceError::NotFound(Resource::Order(id)) => SagaError::OrderNotFound(id),
            ServiceError::NotFound(Resource::Payment(id)) => SagaError::PaymentNotFound(id),
            ServiceError::InsufficientStock {
                product_id,
                available,
                requested,
            } => SagaError::InsufficientStock {
                product_id,
                available,
                requested,
            },
            ServiceError::Declined(payment) => SagaError::PaymentDeclined {
                order_id: payment.order_id,
                payment_id: payment.id,
            },
            ServiceError::InvalidState(msg) => SagaError::InvalidState(msg),
            ServiceError::Transient(reason) => SagaError::DependencyUnavailable {
                service: service.to_string(),
                reason,
            },
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
