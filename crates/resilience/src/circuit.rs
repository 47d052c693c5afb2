//! Circuit breaker state machine.
//!
//! ```text
//!            N consecutive failures
//! Closed ─────────────────────────────► Open
//!   ▲                                    │  cooldown elapsed
//!   │ trial succeeds                     ▼
//!   └──────────────────────────────── HalfOpen
//!                 trial fails: back to Open, cooldown restarted
//! ```
//!
//! One [`CircuitBreaker`] exists per logical dependency and is shared by all
//! callers targeting it. All state lives behind one mutex so concurrent callers
//! observe a consistent state, and only one HalfOpen trial is in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through, failures are counted.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// A single trial call decides whether to close or re-open.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Whether an admitted call is a normal pass-through or the HalfOpen trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Pass,
    Trial,
}

#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    target: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub(crate) fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            target: target.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, promoting Open to HalfOpen once the cooldown elapsed.
    pub(crate) fn state(&self) -> CircuitState {
        let mut state = self.lock();
        self.promote_if_cooled(&mut state);
        state.state
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Asks for permission to make one attempt.
    ///
    /// Returns `None` when the call must be short-circuited.
    pub(crate) fn admit(self: &Arc<Self>) -> Option<Permit> {
        let mut state = self.lock();
        self.promote_if_cooled(&mut state);

        let admission = match state.state {
            CircuitState::Closed => Admission::Pass,
            CircuitState::Open => return None,
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    return None;
                }
                state.trial_in_flight = true;
                Admission::Trial
            }
        };

        Some(Permit {
            breaker: Arc::clone(self),
            admission,
            settled: false,
        })
    }

    /// Forces the breaker back to Closed.
    pub(crate) fn reset(&self) {
        let mut state = self.lock();
        if state.state != CircuitState::Closed {
            self.transition(&mut state, CircuitState::Closed);
        }
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.trial_in_flight = false;
        tracing::info!(target_service = %self.target, "circuit breaker manually reset");
    }

    fn promote_if_cooled(&self, state: &mut BreakerState) {
        if state.state != CircuitState::Open {
            return;
        }
        let cooled = state
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() >= self.config.cooldown);
        if cooled {
            self.transition(state, CircuitState::HalfOpen);
            state.trial_in_flight = false;
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut state = self.lock();
        if admission == Admission::Trial {
            state.trial_in_flight = false;
        }
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if admission == Admission::Trial => {
                state.consecutive_failures = 0;
                state.opened_at = None;
                self.transition(&mut state, CircuitState::Closed);
            }
            // A call admitted before the circuit opened; its success does not
            // override the trial protocol.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, admission: Admission) {
        let mut state = self.lock();
        if admission == Admission::Trial {
            state.trial_in_flight = false;
        }
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        match state.state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        target_service = %self.target,
                        failures = state.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "failure threshold reached"
                    );
                    state.opened_at = Some(Instant::now());
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if admission == Admission::Trial => {
                tracing::warn!(target_service = %self.target, "trial call failed");
                state.opened_at = Some(Instant::now());
                self.transition(&mut state, CircuitState::Open);
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        state.state = to;
        metrics::counter!(
            "circuit_transitions_total",
            "target" => self.target.clone(),
            "to" => to.as_str()
        )
        .increment(1);
        match to {
            CircuitState::Open => {
                tracing::warn!(target_service = %self.target, %from, %to, "circuit state transition");
            }
            CircuitState::HalfOpen | CircuitState::Closed => {
                tracing::info!(target_service = %self.target, %from, %to, "circuit state transition");
            }
        }
    }
}

/// Permission for one attempt.
///
/// Must be settled with [`Permit::succeed`] or [`Permit::fail`]. A trial
/// permit dropped unsettled (the caller timed out or was cancelled) counts
/// as a failed trial so the breaker cannot stay stuck in HalfOpen.
#[derive(Debug)]
pub(crate) struct Permit {
    breaker: Arc<CircuitBreaker>,
    admission: Admission,
    settled: bool,
}

impl Permit {
    pub(crate) fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.admission);
    }

    pub(crate) fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.admission);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.on_failure(Admission::Trial);
        }
    }
}
