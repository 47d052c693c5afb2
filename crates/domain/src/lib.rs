//! Data model for the order fulfillment core.
//!
//! This crate holds the records exchanged with the inventory, order and
//! payment services:
//! - `Money` amounts in cents
//! - `Order` rows and the `OrderStatus` transition rules
//! - `Payment` rows and the `PaymentStatus` refund rules
//! - `Product` snapshots and the `StockLedgerEntry` reservation arithmetic

pub mod error;
pub mod money;
pub mod order;
pub mod payment;
pub mod product;

pub use error::DomainError;
pub use money::Money;
pub use order::{NewOrder, Order, OrderStatus};
pub use payment::{Payment, PaymentMethod, PaymentStatus};
pub use product::{Product, StockLedgerEntry};
