//! Resilient call error types.

use thiserror::Error;

/// Tells the retry and circuit logic how to treat an operation error.
pub trait Classify {
    /// Returns true if the error means the dependency is unavailable
    /// (network failure, timeout, 5xx). Such errors are retried and counted
    /// against circuit health.
    ///
    /// Everything else (malformed request, business rejection) passes
    /// through immediately and does not affect the circuit.
    fn is_transient(&self) -> bool;
}

/// Errors produced by [`crate::ResilientCall`].
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The circuit is open; no attempt was made.
    #[error("Circuit open for {target}")]
    CircuitOpen { target: String },

    /// Every permitted attempt failed with a transient error.
    #[error("{target} failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        target: String,
        attempts: u32,
        last: E,
    },

    /// The operation failed with a non-transient error; returned as-is.
    #[error("{0}")]
    Rejected(E),
}

impl<E> CallError<E> {
    /// Returns true if the call was short-circuited by an open breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }

    /// Returns the underlying operation error, if an attempt was made.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::CircuitOpen { .. } => None,
            CallError::ExhaustedRetries { last, .. } => Some(last),
            CallError::Rejected(e) => Some(e),
        }
    }

    /// Maps the underlying operation error.
    pub fn map<F, O>(self, f: F) -> CallError<O>
    where
        F: FnOnce(E) -> O,
    {
        match self {
            CallError::CircuitOpen { target } => CallError::CircuitOpen { target },
            CallError::ExhaustedRetries {
                target,
                attempts,
                last,
            } => CallError::ExhaustedRetries {
                target,
                attempts,
                last: f(last),
            },
            CallError::Rejected(e) => CallError::Rejected(f(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let open: CallError<String> = CallError::CircuitOpen {
            target: "inventory".to_string(),
        };
        assert_eq!(open.to_string(), "Circuit open for inventory");

        let exhausted = CallError::ExhaustedRetries {
            target: "payment".to_string(),
            attempts: 3,
            last: "connection refused".to_string(),
        };
        assert_eq!(
            exhausted.to_string(),
            "payment failed after 3 attempts: connection refused"
        );
    }

    #[test]
    fn test_into_inner_and_map() {
        let rejected: CallError<&str> = CallError::Rejected("bad request");
        assert!(!rejected.is_circuit_open());
        assert_eq!(rejected.map(str::len).into_inner(), Some(11));

        let open: CallError<&str> = CallError::CircuitOpen {
            target: "orders".to_string(),
        };
        assert!(open.is_circuit_open());
        assert_eq!(open.into_inner(), None);
    }
}
