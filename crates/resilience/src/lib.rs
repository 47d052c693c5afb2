//! Protection for calls to independently failing services.
//!
//! - [`ResilientCall`] wraps every outbound call in a circuit breaker and a
//!   bounded exponential-backoff retry.
//! - [`DegradedCache`] collects writes that could not reach their dependency
//!   so they can be reconciled later.
//!
//! Errors returned by the wrapped operation implement [`Classify`]; only
//! transient errors are retried and counted against circuit health.

pub mod cache;
pub mod call;
pub mod circuit;
pub mod error;
pub mod retry;

pub use cache::{DegradedCache, DegradedCacheEntry};
pub use call::{AttemptOutcome, CallAttempt, CircuitSnapshot, ResilientCall};
pub use circuit::{CircuitBreakerConfig, CircuitState};
pub use error::{CallError, Classify};
pub use retry::RetryPolicy;
