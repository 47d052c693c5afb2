//! Order fulfillment saga steps and their compensations.

use serde::{Deserialize, Serialize};

/// The saga type identifier for order fulfillment.
pub const SAGA_TYPE: &str = "OrderFulfillment";

/// A forward step of the order fulfillment saga, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    /// Check required fields and ranges.
    ValidateRequest,
    /// Fetch the product snapshot for its name and unit price.
    LookupProduct,
    /// Decrement stock by the ordered quantity.
    ReserveStock,
    /// Persist the order row as `PENDING`.
    CreateOrder,
    /// Charge the customer.
    ChargePayment,
    /// Move the order to `CONFIRMED`.
    ConfirmOrder,
}

impl SagaStep {
    /// The action that undoes this step once it has completed, if any.
    pub fn compensation(&self) -> Option<Compensation> {
        match self {
            SagaStep::ReserveStock => Some(Compensation::ReleaseStock),
            SagaStep::CreateOrder => Some(Compensation::CancelOrder),
            SagaStep::ValidateRequest
            | SagaStep::LookupProduct
            | SagaStep::ChargePayment
            | SagaStep::ConfirmOrder => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::ValidateRequest => "validate_request",
            SagaStep::LookupProduct => "lookup_product",
            SagaStep::ReserveStock => "reserve_stock",
            SagaStep::CreateOrder => "create_order",
            SagaStep::ChargePayment => "charge_payment",
            SagaStep::ConfirmOrder => "confirm_order",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A compensating action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compensation {
    /// Increment stock back by the reserved quantity.
    ReleaseStock,
    /// Move the order to `CANCELLED`.
    CancelOrder,
}

impl Compensation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compensation::ReleaseStock => "release_stock",
            Compensation::CancelOrder => "cancel_order",
        }
    }
}

impl std::fmt::Display for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compensation_table() {
        assert_eq!(
            SagaStep::ReserveStock.compensation(),
            Some(Compensation::ReleaseStock)
        );
        assert_eq!(
            SagaStep::CreateOrder.compensation(),
            Some(Compensation::CancelOrder)
        );
        assert_eq!(SagaStep::ValidateRequest.compensation(), None);
        assert_eq!(SagaStep::LookupProduct.compensation(), None);
        assert_eq!(SagaStep::ChargePayment.compensation(), None);
        assert_eq!(SagaStep::ConfirmOrder.compensation(), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(SagaStep::ChargePayment.to_string(), "charge_payment");
        assert_eq!(Compensation::ReleaseStock.to_string(), "release_stock");
        assert_eq!(
            serde_json::to_string(&SagaStep::ReserveStock).unwrap(),
            "\"reserve_stock\""
        );
    }
}
