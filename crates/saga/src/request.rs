//! Inbound order request and its validation.

use common::{CustomerId, ProductId};
use domain::PaymentMethod;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

/// A request to place an order, as received from a caller.
///
/// Fields are optional so a missing field can be reported by name instead of
/// failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrder {
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOrder {
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub payment_method: PaymentMethod,
}

impl PlaceOrder {
    pub fn new(
        customer_id: CustomerId,
        product_id: ProductId,
        quantity: i64,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            customer_id: Some(customer_id),
            product_id: Some(product_id),
            quantity: Some(quantity),
            payment_method: Some(payment_method.into()),
        }
    }

    /// Checks that every field is present and `quantity > 0`.
    ///
    /// # Errors
    ///
    /// [`SagaError::InvalidRequest`] naming the missing fields or the bad value.
    pub fn validate(&self) -> Result<ValidatedOrder, SagaError> {
        let payment_method = self
            .payment_method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());

        let mut missing = Vec::new();
        if self.customer_id.is_none() {
            missing.push("customer_id");
        }
        if self.product_id.is_none() {
            missing.push("product_id");
        }
        if self.quantity.is_none() {
            missing.push("quantity");
        }
        if payment_method.is_none() {
            missing.push("payment_method");
        }

        match (self.customer_id, self.product_id, self.quantity, payment_method) {
            (Some(customer_id), Some(product_id), Some(quantity), Some(method)) => {
                if quantity <= 0 {
                    return Err(SagaError::InvalidRequest(format!(
                        "quantity must be positive, got {quantity}"
                    )));
                }
                let quantity = u32::try_from(quantity).map_err(|_| {
                    SagaError::InvalidRequest(format!("quantity {quantity} is too large"))
                })?;
                Ok(ValidatedOrder {
                    customer_id,
                    product_id,
                    quantity,
                    payment_method: PaymentMethod::new(method),
                })
            }
            _ => Err(SagaError::InvalidRequest(format!(
                "Missing required fields: {}",
                missing.join(", ")
            ))),
        }
    }
}
