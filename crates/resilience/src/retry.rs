//! Bounded retry with exponential backoff.

use std::time::Duration;

/// Retry policy for transient failures.
///
/// # Default Values
///
/// - `max_attempts`: 3 (including the first attempt)
/// - `base_delay`: 500ms
/// - `multiplier`: 2.0
/// - `max_delay`: 10 seconds
/// - `retry_when_open`: false
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Growth factor applied per further failed attempt.
    pub multiplier: f64,
    /// Cap for the exponential delay.
    pub max_delay: Duration,
    /// Whether an open circuit is waited out (with backoff) instead of
    /// failing fast. Only compensating calls set this.
    pub retry_when_open: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            retry_when_open: false,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: RetryPolicy::default(),
        }
    }

    /// Policy for compensating actions.
    ///
    /// Leaving stock under-counted is worse than a slow release: this policy
    /// makes more attempts with longer waits, and its total backoff outlasts
    /// a default breaker cooldown so an open circuit is waited out.
    #[must_use]
    pub fn compensation() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            retry_when_open: true,
        }
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to sleep after `failed_attempts` attempts have failed (1-based).
    ///
    /// `base_delay * multiplier^(failed_attempts - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set the maximum number of attempts (at least one is always made).
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    #[must_use]
    pub fn retry_when_open(mut self, retry: bool) -> Self {
        self.policy.retry_when_open = retry;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_secs(2))
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(400), Duration::from_secs(10));
    }

    #[test]
    fn test_builder_keeps_at_least_one_attempt() {
        let policy = RetryPolicy::builder().max_attempts(0).build();
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_compensation_is_more_aggressive_than_default() {
        let default = RetryPolicy::default();
        let compensation = RetryPolicy::compensation();
        assert!(compensation.max_attempts > default.max_attempts);
        assert!(compensation.max_delay >= default.max_delay);
        assert!(compensation.retry_when_open);
        assert!(!default.retry_when_open);
    }
}
