//! Shared identifiers and lifecycle primitives used across the workspace.

pub mod shutdown;
pub mod types;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use types::{CorrelationId, CustomerId, OrderId, PaymentId, ProductId};
