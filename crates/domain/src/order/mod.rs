//! Order rows.

mod state;

pub use state::OrderStatus;

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ProductId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// An order as stored by the order service.
///
/// Created with status `PENDING` once stock is reserved; afterwards only its
/// status changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub total_price: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create an order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub total_price: Money,
}

impl NewOrder {
    /// Materializes the row with the key assigned by the store.
    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            customer_id: self.customer_id,
            product_id: self.product_id,
            product_name: self.product_name,
            quantity: self.quantity,
            total_price: self.total_price,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        }
    }
}
