//! HTTP handlers.

pub mod health;
pub mod metrics;
pub mod observations;
pub mod orders;
pub mod payments;
