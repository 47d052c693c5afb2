//! Protected invocation of a remote operation.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::{CallError, Classify};
use crate::retry::RetryPolicy;

/// Result classification of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// Transient failure, counted against circuit health.
    Failure,
    /// Non-transient error; passed through without affecting the circuit.
    Excluded,
}

impl AttemptOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure => "failure",
            AttemptOutcome::Excluded => "excluded",
        }
    }
}

/// Record of a single attempt. Lives only for the duration of one
/// invocation; it is logged and then dropped.
#[derive(Debug, Clone)]
pub struct CallAttempt {
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
}

impl CallAttempt {
    fn log(&self, attempt: u32) {
        tracing::debug!(
            target_service = %self.target,
            attempt,
            started_at = %self.started_at,
            outcome = self.outcome.as_str(),
            latency_ms = self.latency.as_millis() as u64,
            "call attempt finished"
        );
    }
}

/// Point-in-time view of a dependency's circuit and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub target: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub excluded_count: u64,
    pub rejected_count: u64,
}

#[derive(Debug, Default)]
struct Counters {
    successes: AtomicU64,
    failures: AtomicU64,
    excluded: AtomicU64,
    rejections: AtomicU64,
}

/// Circuit breaker plus bounded retry around calls to one dependency.
///
/// Clones share the same breaker and counters, so create one instance per
/// logical dependency and hand clones to every caller.
///
/// `invoke` suspends the caller for the duration of the attempts and the
/// backoff sleeps; callers apply their own overall timeout.
#[derive(Debug, Clone)]
pub struct ResilientCall {
    target: Arc<str>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    counters: Arc<Counters>,
}

impl ResilientCall {
    /// Creates a wrapper for the dependency named `target`.
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig, policy: RetryPolicy) -> Self {
        let target: String = target.into();
        Self {
            breaker: Arc::new(CircuitBreaker::new(target.clone(), config)),
            target: Arc::from(target),
            policy,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Creates a wrapper with the default breaker and retry settings.
    pub fn with_defaults(target: impl Into<String>) -> Self {
        Self::new(target, CircuitBreakerConfig::default(), RetryPolicy::default())
    }

    /// Name of the guarded dependency.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The retry policy used by [`ResilientCall::invoke`].
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker_config(&self) -> &CircuitBreakerConfig {
        self.breaker.config()
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Forces the circuit back to Closed (operator intervention).
    pub fn reset(&self) {
        self.breaker.reset();
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            target: self.target.to_string(),
            state: self.breaker.state(),
            consecutive_failures: self.breaker.consecutive_failures(),
            success_count: self.counters.successes.load(Ordering::Relaxed),
            failure_count: self.counters.failures.load(Ordering::Relaxed),
            excluded_count: self.counters.excluded.load(Ordering::Relaxed),
            rejected_count: self.counters.rejections.load(Ordering::Relaxed),
        }
    }

    /// Invokes `operation` under the default retry policy.
    ///
    /// # Errors
    ///
    /// - [`CallError::CircuitOpen`] when the circuit rejects the call; no attempt is made.
    /// - [`CallError::ExhaustedRetries`] with the last error when every attempt failed transiently.
    /// - [`CallError::Rejected`] immediately for non-transient errors.
    pub async fn invoke<F, Fut, T, E>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let policy = self.policy.clone();
        self.invoke_with(&policy, operation).await
    }

    /// Invokes `operation` under an explicit retry policy, sharing this
    /// dependency's circuit.
    pub async fn invoke_with<F, Fut, T, E>(
        &self,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt: u32 = 0;
        let mut last_error: Option<E> = None;

        loop {
            attempt += 1;

            let Some(permit) = self.breaker.admit() else {
                self.counters.rejections.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("resilient_call_rejections_total", "target" => self.target.to_string())
                    .increment(1);

                if policy.retry_when_open && attempt < max_attempts {
                    let delay = policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        target_service = %self.target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "circuit open, waiting before next attempt"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }

                // An earlier attempt reached the dependency; its error is the real cause.
                if let Some(last) = last_error {
                    tracing::error!(
                        target_service = %self.target,
                        attempts = attempt - 1,
                        error = %last,
                        "circuit opened during retries"
                    );
                    return Err(CallError::ExhaustedRetries {
                        target: self.target.to_string(),
                        attempts: attempt - 1,
                        last,
                    });
                }

                tracing::warn!(target_service = %self.target, "circuit open, rejecting call");
                return Err(CallError::CircuitOpen {
                    target: self.target.to_string(),
                });
            };

            let started_at = Utc::now();
            let clock = Instant::now();
            let result = operation().await;
            let latency = clock.elapsed();

            let outcome = match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(e) if e.is_transient() => AttemptOutcome::Failure,
                Err(_) => AttemptOutcome::Excluded,
            };
            self.record(outcome);
            CallAttempt {
                target: self.target.to_string(),
                started_at,
                outcome,
                latency,
            }
            .log(attempt);

            match result {
                Ok(value) => {
                    permit.succeed();
                    if attempt > 1 {
                        tracing::info!(target_service = %self.target, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if outcome == AttemptOutcome::Excluded => {
                    // The dependency answered; a malformed request says nothing about its health.
                    permit.succeed();
                    return Err(CallError::Rejected(err));
                }
                Err(err) => {
                    permit.fail();

                    if attempt >= max_attempts {
                        tracing::error!(
                            target_service = %self.target,
                            attempts = attempt,
                            error = %err,
                            "retries exhausted"
                        );
                        return Err(CallError::ExhaustedRetries {
                            target: self.target.to_string(),
                            attempts: attempt,
                            last: err,
                        });
                    }

                    let delay = policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        target_service = %self.target,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn record(&self, outcome: AttemptOutcome) {
        let counter = match outcome {
            AttemptOutcome::Success => &self.counters.successes,
            AttemptOutcome::Failure => &self.counters.failures,
            AttemptOutcome::Excluded => &self.counters.excluded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "resilient_call_attempts_total",
            "target" => self.target.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }
}
