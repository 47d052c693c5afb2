//! Register of cross-service inconsistencies awaiting reconciliation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use common::{CorrelationId, OrderId, PaymentId, ProductId};
use serde::Serialize;

/// What drifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InconsistencyKind {
    /// Payment succeeded but the order is still `PENDING`.
    OrderNotConfirmed,
    /// The saga was compensated or the payment refunded, but the order is
    /// not `CANCELLED`.
    OrderNotCancelled,
    /// Reserved stock could not be given back.
    StockNotReleased,
    /// A step was abandoned mid-flight (timeout or cancellation); the
    /// dependency may or may not have applied it.
    StepOutcomeUnknown,
}

impl InconsistencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InconsistencyKind::OrderNotConfirmed => "order_not_confirmed",
            InconsistencyKind::OrderNotCancelled => "order_not_cancelled",
            InconsistencyKind::StockNotReleased => "stock_not_released",
            InconsistencyKind::StepOutcomeUnknown => "step_outcome_unknown",
        }
    }
}

impl std::fmt::Display for InconsistencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One flagged inconsistency window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inconsistency {
    pub correlation_id: CorrelationId,
    pub kind: InconsistencyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
    pub detail: String,
    pub detected_at: DateTime<Utc>,
}

impl Inconsistency {
    pub fn new(
        correlation_id: CorrelationId,
        kind: InconsistencyKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            kind,
            order_id: None,
            product_id: None,
            quantity: None,
            payment_id: None,
            detail: detail.into(),
            detected_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_order(mut self, order_id: Option<OrderId>) -> Self {
        self.order_id = order_id;
        self
    }

    #[must_use]
    pub fn with_stock(mut self, product_id: Option<ProductId>, quantity: Option<u32>) -> Self {
        self.product_id = product_id;
        self.quantity = quantity;
        self
    }

    #[must_use]
    pub fn with_payment(mut self, payment_id: Option<PaymentId>) -> Self {
        self.payment_id = payment_id;
        self
    }
}

/// Shared, append-only list of flagged inconsistencies.
#[derive(Debug, Clone, Default)]
pub struct InconsistencyRegister {
    entries: Arc<Mutex<Vec<Inconsistency>>>,
}

impl InconsistencyRegister {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Inconsistency>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `entry` and logs it at error level.
    pub fn flag(&self, entry: Inconsistency) -> Inconsistency {
        tracing::error!(
            correlation_id = %entry.correlation_id,
            kind = entry.kind.as_str(),
            order_id = ?entry.order_id,
            product_id = ?entry.product_id,
            quantity = ?entry.quantity,
            payment_id = ?entry.payment_id,
            detail = %entry.detail,
            "inconsistency flagged for reconciliation"
        );
        metrics::counter!("saga_inconsistencies_total", "kind" => entry.kind.as_str())
            .increment(1);
        self.lock().push(entry.clone());
        entry
    }

    pub fn entries(&self) -> Vec<Inconsistency> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_appends() {
        let register = InconsistencyRegister::new();
        let clone = register.clone();

        clone.flag(
            Inconsistency::new(
                CorrelationId::new(),
                InconsistencyKind::StockNotReleased,
                "inventory circuit open",
            )
            .with_stock(Some(ProductId::new(1)), Some(5)),
        );

        let entries = register.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, InconsistencyKind::StockNotReleased);
        assert_eq!(entries[0].quantity, Some(5));
    }

    #[test]
    fn test_serialized_kind() {
        let entry = Inconsistency::new(
            CorrelationId::new(),
            InconsistencyKind::OrderNotConfirmed,
            "timeout",
        )
        .with_order(Some(OrderId::new(2)));
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["kind"], "ORDER_NOT_CONFIRMED");
        assert_eq!(json["order_id"], 2);
        assert!(json.get("payment_id").is_none());
    }
}
