//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: endpoint assumed down, requests fail fast
//! - Half-Open: testing if endpoint recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//!                (adaptive: or windowed error rate > 50%)
//! Open → Half-Open: open_timeout elapsed since the last failure, checked on admission
//! Half-Open → Closed: consecutive_successes >= success_threshold
//! Half-Open → Open: any trial fails
//! ```
//!
//! # Design Decisions
//! - Per-endpoint circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - At most `half_open_max_calls` concurrent trials in Half-Open
//! - Results from permits issued before the last transition are ignored

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::config::{CircuitBreakerConfig, CircuitStrategy};
use crate::dispatch::RequestOutcome;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

/// Admission refused: the circuit is open or half-open trials are exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is {}", .state.as_str())]
pub struct CircuitOpenError {
    pub name: String,
    pub state: CircuitState,
}

/// Read-only view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub strategy: CircuitStrategy,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub half_open_trials: u32,
    /// Calls refused without dispatch.
    pub rejected: u64,
    /// Windowed error rate, adaptive strategy only.
    pub error_rate: Option<f64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    half_open_trials: u32,
    /// Bumped on every transition; permits carry the value they were issued under.
    generation: u64,
    /// `true` = failure. Adaptive strategy only.
    window: VecDeque<bool>,
    rejected: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            half_open_trials: 0,
            generation: 0,
            window: VecDeque::new(),
            rejected: 0,
        }
    }

    fn error_rate(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let failures = self.window.iter().filter(|failed| **failed).count();
        Some(failures as f64 / self.window.len() as f64)
    }
}

/// Per-endpoint circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Ask for permission to dispatch.
    ///
    /// While Open, the Open → Half-Open timeout is evaluated here. Rejections
    /// never touch the failure or success counters.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CircuitPermit, CircuitOpenError> {
        let mut state = self.lock();

        if state.state == CircuitState::Open {
            let elapsed = state
                .last_failure
                .map(|at| at.elapsed() >= self.config.open_timeout())
                .unwrap_or(true);
            if elapsed {
                self.transition(&mut state, CircuitState::HalfOpen);
            } else {
                state.rejected += 1;
                return Err(self.open_error(CircuitState::Open));
            }
        }

        let trial = match state.state {
            CircuitState::HalfOpen => {
                if state.half_open_trials >= self.config.half_open_max_calls {
                    state.rejected += 1;
                    return Err(self.open_error(CircuitState::HalfOpen));
                }
                state.half_open_trials += 1;
                true
            }
            _ => false,
        };

        Ok(CircuitPermit {
            breaker: Arc::clone(self),
            trial,
            generation: state.generation,
            recorded: false,
        })
    }

    /// Force the breaker back to Closed with zeroed counters.
    pub fn reset(&self) {
        let mut state = self.lock();
        let generation = state.generation + 1;
        let rejected = state.rejected;
        *state = BreakerState::new();
        state.generation = generation;
        state.rejected = rejected;
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
        metrics::record_circuit_state(&self.name, CircuitState::Closed.gauge_value(), "closed");
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: state.state,
            strategy: self.config.strategy,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            half_open_trials: state.half_open_trials,
            rejected: state.rejected,
            error_rate: match self.config.strategy {
                CircuitStrategy::Adaptive => Some(state.error_rate().unwrap_or(0.0)),
                CircuitStrategy::Consecutive => None,
            },
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_error(&self, state: CircuitState) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
            state,
        }
    }

    fn on_success(&self, trial: bool, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        if trial {
            state.half_open_trials = state.half_open_trials.saturating_sub(1);
        }
        self.push_window(&mut state, false);
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;

        if state.state == CircuitState::HalfOpen
            && state.consecutive_successes >= self.config.success_threshold
        {
            self.transition(&mut state, CircuitState::Closed);
        }
    }

    fn on_failure(&self, trial: bool, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        if trial {
            state.half_open_trials = state.half_open_trials.saturating_sub(1);
        }
        self.push_window(&mut state, true);
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;
        state.last_failure = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => self.transition(&mut state, CircuitState::Open),
            CircuitState::Closed => {
                if self.window_tripped(&state) {
                    tracing::warn!(
                        breaker = %self.name,
                        error_rate = state.error_rate().unwrap_or(0.0),
                        "Windowed error rate exceeded 50%"
                    );
                    self.transition(&mut state, CircuitState::Open);
                } else if state.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation && state.state == CircuitState::HalfOpen {
            state.half_open_trials = state.half_open_trials.saturating_sub(1);
        }
    }

    fn push_window(&self, state: &mut BreakerState, failed: bool) {
        if self.config.strategy != CircuitStrategy::Adaptive {
            return;
        }
        state.window.push_back(failed);
        while state.window.len() > self.config.window_size {
            state.window.pop_front();
        }
    }

    fn window_tripped(&self, state: &BreakerState) -> bool {
        self.config.strategy == CircuitStrategy::Adaptive
            && state.window.len() >= self.config.min_calls
            && state.error_rate().is_some_and(|rate| rate > 0.5)
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        state.state = to;
        state.generation += 1;
        state.half_open_trials = 0;
        match to {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
                state.window.clear();
            }
            CircuitState::Open => {
                state.consecutive_successes = 0;
                state.window.clear();
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes = 0;
            }
        }

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = from.as_str(),
                consecutive_failures = state.consecutive_failures,
                "Circuit opened"
            ),
            _ => tracing::info!(
                breaker = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit state changed"
            ),
        }
        metrics::record_circuit_state(&self.name, to.gauge_value(), to.as_str());
    }
}

/// Permission to dispatch one logical request.
///
/// Recording consumes the permit. A permit dropped unrecorded frees its
/// half-open trial slot and leaves every counter untouched.
#[derive(Debug)]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    generation: u64,
    recorded: bool,
}

impl CircuitPermit {
    /// True for a half-open trial call.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Feed an outcome: only endpoint faults count as failures.
    pub fn record(self, outcome: &RequestOutcome) {
        if outcome.is_endpoint_fault() {
            self.record_failure();
        } else {
            self.record_success();
        }
    }

    pub fn record_success(mut self) {
        self.recorded = true;
        self.breaker.on_success(self.trial, self.generation);
    }

    pub fn record_failure(mut self) {
        self.recorded = true;
        self.breaker.on_failure(self.trial, self.generation);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.recorded && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(failure_threshold: u32, open_timeout_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            success_threshold: 2,
            open_timeout_ms,
            half_open_max_calls: 1,
            ..CircuitBreakerConfig::default()
        }
    }

    fn fail(breaker: &Arc<CircuitBreaker>) {
        breaker.try_acquire().unwrap().record_failure();
    }

    fn succeed(breaker: &Arc<CircuitBreaker>) {
        breaker.try_acquire().unwrap().record_success();
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = Arc::new(CircuitBreaker::new("test", config(3, 60_000)));
        fail(&breaker);
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = breaker.try_acquire().unwrap_err();
        assert_eq!(err.state, CircuitState::Open);

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.consecutive_failures, 3);
        assert_eq!(snapshot.rejected, 1);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let breaker = Arc::new(CircuitBreaker::new("test", config(3, 60_000)));
        fail(&breaker);
        fail(&breaker);
        succeed(&breaker);
        fail(&breaker);
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_recovery() {
        let breaker = Arc::new(CircuitBreaker::new("test", config(1, 20)));
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));
        let permit = breaker.try_acquire().unwrap();
        assert!(permit.is_trial());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Only one trial slot.
        assert_eq!(breaker.try_acquire().unwrap_err().state, CircuitState::HalfOpen);

        permit.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = Arc::new(CircuitBreaker::new("test", config(1, 20)));
        fail(&breaker);
        std::thread::sleep(Duration::from_millis(30));

        succeed(&breaker);
        assert_eq!(breaker.snapshot().consecutive_successes, 1);
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().consecutive_successes, 0);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_dropped_trial_frees_slot() {
        let breaker = Arc::new(CircuitBreaker::new("test", config(1, 20)));
        fail(&breaker);
        std::thread::sleep(Duration::from_millis(30));

        let permit = breaker.try_acquire().unwrap();
        drop(permit);
        assert_eq!(breaker.snapshot().half_open_trials, 0);
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_stale_permit_is_ignored() {
        let breaker = Arc::new(CircuitBreaker::new("test", config(1, 60_000)));
        let late = breaker.try_acquire().unwrap();
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        late.record_success();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_rpc_errors_do_not_trip() {
        use crate::dispatch::OutcomeError;

        let breaker = Arc::new(CircuitBreaker::new("test", config(1, 60_000)));
        let outcome = RequestOutcome::failure(
            OutcomeError::Rpc {
                code: -32601,
                message: "Method not found".into(),
            },
            Some(1.0),
            Some(200),
        );
        breaker.try_acquire().unwrap().record(&outcome);
        assert_eq!(breaker.state(), CircuitState::Closed);

        let outcome = RequestOutcome::failure(OutcomeError::Timeout(10), Some(10.0), None);
        breaker.try_acquire().unwrap().record(&outcome);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_adaptive_window_trips() {
        let config = CircuitBreakerConfig {
            strategy: CircuitStrategy::Adaptive,
            failure_threshold: 100,
            window_size: 10,
            min_calls: 10,
            ..CircuitBreakerConfig::default()
        };
        let breaker = Arc::new(CircuitBreaker::new("adaptive", config));

        // Alternate so the consecutive counter never exceeds 1.
        for _ in 0..4 {
            fail(&breaker);
            succeed(&breaker);
        }
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);
        // 10 calls, 5 failures: exactly 50% is not enough.
        succeed(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);
        // The window slides but still holds 5 failures out of 10.
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);
        // 6 out of 10.
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset() {
        let breaker = Arc::new(CircuitBreaker::new("test", config(1, 60_000)));
        fail(&breaker);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
        assert!(breaker.try_acquire().is_ok());
    }
}
