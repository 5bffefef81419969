//! Per-endpoint rate limiting.
//!
//! Three strategies share one admission API:
//! - token bucket: continuous refill up to a burst capacity
//! - sliding window: at most `rate * window` calls in the trailing window
//! - adaptive: a token bucket whose rate follows the endpoint's answers
//!
//! Waiting never holds the limiter lock, and every wait races the
//! cancellation token. A permit that is dropped before dispatch refunds
//! what it took.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{AdaptiveRateConfig, RateLimitConfig, RateLimitStrategy};
use crate::dispatch::{Endpoint, RequestOutcome};
use crate::observability::metrics;

/// Smallest sleep between admission checks.
const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    /// The request can never be admitted.
    #[error("requested {requested} permits but capacity is {burst}")]
    ExceedsBurst { requested: u32, burst: u32 },

    #[error("rate must be positive and finite, got {0}")]
    InvalidRate(f64),

    #[error("rate limit wait cancelled")]
    Cancelled,
}

/// Continuous-refill bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(rate: f64, capacity: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            rate,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    fn try_take(&mut self, n: u32, now: Instant) -> Result<(), Admission> {
        let wanted = f64::from(n);
        if wanted > self.capacity {
            return Err(Admission::Never {
                burst: self.capacity as u32,
            });
        }
        self.refill(now);
        if self.tokens >= wanted {
            self.tokens -= wanted;
            Ok(())
        } else {
            let missing = wanted - self.tokens;
            Err(Admission::Wait(saturating_secs(missing / self.rate)))
        }
    }

    fn refund(&mut self, n: u32) {
        self.tokens = (self.tokens + f64::from(n)).min(self.capacity);
    }
}

/// Timestamps of calls admitted within the trailing window.
#[derive(Debug)]
struct SlidingWindow {
    calls: VecDeque<Instant>,
    limit: f64,
    window: Duration,
}

impl SlidingWindow {
    fn new(rate: f64, window_secs: f64) -> Self {
        Self {
            calls: VecDeque::new(),
            limit: rate * window_secs,
            window: saturating_secs(window_secs),
        }
    }

    fn capacity(&self) -> u32 {
        (self.limit.ceil() as u32).max(1)
    }

    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.calls.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn try_take(&mut self, n: u32, now: Instant) -> Result<(), Admission> {
        if n > self.capacity() {
            return Err(Admission::Never {
                burst: self.capacity(),
            });
        }
        self.evict(now);
        if ((self.calls.len() + n as usize - 1) as f64) < self.limit {
            self.calls.extend(std::iter::repeat(now).take(n as usize));
            Ok(())
        } else {
            let wait = match self.calls.front() {
                Some(oldest) => self
                    .window
                    .saturating_sub(now.saturating_duration_since(*oldest)),
                None => MIN_WAIT,
            };
            Err(Admission::Wait(wait))
        }
    }

    fn refund(&mut self, n: u32, stamp: Instant) {
        for _ in 0..n {
            match self.calls.iter().rposition(|at| *at == stamp) {
                Some(index) => {
                    self.calls.remove(index);
                }
                None => break,
            }
        }
    }
}

/// Token bucket whose rate is tuned by observed outcomes.
#[derive(Debug)]
struct Adaptive {
    bucket: TokenBucket,
    tuning: AdaptiveRateConfig,
    /// Capacity follows the rate unless a burst size was configured.
    fixed_burst: bool,
    consecutive_successes: u32,
    consecutive_errors: u32,
}

impl Adaptive {
    fn set_rate(&mut self, rate: f64, endpoint: &str) {
        let previous = self.bucket.rate;
        if rate == previous {
            return;
        }
        self.bucket.refill(Instant::now());
        self.bucket.rate = rate;
        if !self.fixed_burst {
            self.bucket.capacity = rate.floor().max(1.0);
            self.bucket.tokens = self.bucket.tokens.min(self.bucket.capacity);
        }
        tracing::info!(endpoint, previous, rate, "Adaptive rate adjusted");
    }

    fn observe(&mut self, outcome: &RequestOutcome, endpoint: &str) {
        if outcome.is_success() {
            self.consecutive_errors = 0;
            self.consecutive_successes += 1;
            if self.consecutive_successes >= self.tuning.success_streak {
                self.consecutive_successes = 0;
                let rate =
                    (self.bucket.rate * self.tuning.increase_factor).min(self.tuning.max_rate);
                self.set_rate(rate, endpoint);
            }
        } else if outcome.is_rate_limited() {
            self.consecutive_successes = 0;
            self.consecutive_errors = 0;
            let rate = (self.bucket.rate * self.tuning.decrease_factor).max(self.tuning.min_rate);
            self.set_rate(rate, endpoint);
        } else if outcome.is_endpoint_fault() {
            self.consecutive_successes = 0;
            self.consecutive_errors += 1;
            if self.consecutive_errors >= self.tuning.error_streak {
                self.consecutive_errors = 0;
                let rate =
                    (self.bucket.rate * self.tuning.decrease_factor).max(self.tuning.min_rate);
                self.set_rate(rate, endpoint);
            }
        }
    }
}

#[derive(Debug)]
enum Strategy {
    TokenBucket(TokenBucket),
    SlidingWindow(SlidingWindow),
    Adaptive(Adaptive),
}

impl Strategy {
    fn try_take(&mut self, n: u32, now: Instant) -> Result<(), Admission> {
        match self {
            Self::TokenBucket(bucket) => bucket.try_take(n, now),
            Self::SlidingWindow(window) => window.try_take(n, now),
            Self::Adaptive(adaptive) => adaptive.bucket.try_take(n, now),
        }
    }

    fn refund(&mut self, n: u32, stamp: Instant) {
        match self {
            Self::TokenBucket(bucket) => bucket.refund(n),
            Self::SlidingWindow(window) => window.refund(n, stamp),
            Self::Adaptive(adaptive) => adaptive.bucket.refund(n),
        }
    }
}

enum Admission {
    Wait(Duration),
    Never { burst: u32 },
}

/// Read-only view of a limiter.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub endpoint: String,
    /// `None` when rate limiting is disabled.
    pub strategy: Option<RateLimitStrategy>,
    pub rate: Option<f64>,
    pub capacity: Option<u32>,
    /// Tokens left (buckets) or free slots (window).
    pub available: Option<f64>,
}

/// Admission control for one endpoint.
#[derive(Debug)]
pub struct RateLimiter {
    endpoint: String,
    strategy: Option<Mutex<Strategy>>,
}

impl RateLimiter {
    /// A limiter that admits everything immediately.
    pub fn unlimited(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            strategy: None,
        }
    }

    pub fn token_bucket(
        endpoint: impl Into<String>,
        rate: f64,
        burst: u32,
    ) -> Result<Self, RateLimitError> {
        check_rate(rate)?;
        Ok(Self::with_strategy(
            endpoint,
            Strategy::TokenBucket(TokenBucket::new(rate, f64::from(burst))),
        ))
    }

    pub fn sliding_window(
        endpoint: impl Into<String>,
        rate: f64,
        window_secs: f64,
    ) -> Result<Self, RateLimitError> {
        check_rate(rate)?;
        check_rate(window_secs)?;
        Ok(Self::with_strategy(
            endpoint,
            Strategy::SlidingWindow(SlidingWindow::new(rate, window_secs)),
        ))
    }

    pub fn adaptive(
        endpoint: impl Into<String>,
        initial_rate: f64,
        burst: Option<u32>,
        tuning: AdaptiveRateConfig,
    ) -> Result<Self, RateLimitError> {
        check_rate(initial_rate)?;
        check_rate(tuning.min_rate)?;
        let rate = initial_rate.clamp(tuning.min_rate, tuning.max_rate.max(tuning.min_rate));
        let capacity = match burst {
            Some(burst) => f64::from(burst),
            None => rate.floor().max(1.0),
        };
        Ok(Self::with_strategy(
            endpoint,
            Strategy::Adaptive(Adaptive {
                bucket: TokenBucket::new(rate, capacity),
                tuning,
                fixed_burst: burst.is_some(),
                consecutive_successes: 0,
                consecutive_errors: 0,
            }),
        ))
    }

    pub fn from_config(
        endpoint: impl Into<String>,
        config: &RateLimitConfig,
    ) -> Result<Self, RateLimitError> {
        if !config.enabled {
            return Ok(Self::unlimited(endpoint));
        }
        match config.strategy {
            RateLimitStrategy::TokenBucket => {
                Self::token_bucket(endpoint, config.requests_per_second, config.burst())
            }
            RateLimitStrategy::SlidingWindow => {
                Self::sliding_window(endpoint, config.requests_per_second, config.window_secs)
            }
            RateLimitStrategy::Adaptive => Self::adaptive(
                endpoint,
                config.requests_per_second,
                config.burst_size,
                config.adaptive.clone(),
            ),
        }
    }

    fn with_strategy(endpoint: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            endpoint: endpoint.into(),
            strategy: Some(Mutex::new(strategy)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Wait until `n` permits are available and take them.
    pub async fn acquire(
        self: &Arc<Self>,
        n: u32,
        cancel: &CancellationToken,
    ) -> Result<RatePermit, RateLimitError> {
        let Some(strategy) = &self.strategy else {
            return Ok(RatePermit::free());
        };
        if n == 0 {
            return Ok(RatePermit::free());
        }

        let start = Instant::now();
        let mut waited = false;
        loop {
            let now = Instant::now();
            let admission = lock(strategy).try_take(n, now);
            let wait = match admission {
                Ok(()) => {
                    if waited {
                        metrics::record_rate_limit_wait(
                            &self.endpoint,
                            start.elapsed().as_secs_f64(),
                        );
                    }
                    return Ok(RatePermit {
                        limiter: Some(Arc::clone(self)),
                        permits: n,
                        stamp: now,
                        committed: false,
                    });
                }
                Err(Admission::Never { burst }) => {
                    return Err(RateLimitError::ExceedsBurst {
                        requested: n,
                        burst,
                    })
                }
                Err(Admission::Wait(wait)) => wait.max(MIN_WAIT),
            };

            waited = true;
            tracing::trace!(
                endpoint = %self.endpoint,
                wait_ms = wait.as_secs_f64() * 1000.0,
                "Waiting for rate limit"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Feed a finished outcome to the adaptive strategy; no-op otherwise.
    pub fn observe(&self, outcome: &RequestOutcome) {
        if let Some(strategy) = &self.strategy {
            if let Strategy::Adaptive(adaptive) = &mut *lock(strategy) {
                adaptive.observe(outcome, &self.endpoint);
            }
        }
    }

    /// Current rate in requests per second, `None` when unlimited.
    pub fn current_rate(&self) -> Option<f64> {
        let strategy = self.strategy.as_ref()?;
        let rate = match &*lock(strategy) {
            Strategy::TokenBucket(bucket) => bucket.rate,
            Strategy::SlidingWindow(window) => window.limit / window.window.as_secs_f64(),
            Strategy::Adaptive(adaptive) => adaptive.bucket.rate,
        };
        Some(rate)
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let Some(strategy) = &self.strategy else {
            return RateLimiterSnapshot {
                endpoint: self.endpoint.clone(),
                strategy: None,
                rate: None,
                capacity: None,
                available: None,
            };
        };

        let now = Instant::now();
        let mut guard = lock(strategy);
        let (kind, rate, capacity, available) = match &mut *guard {
            Strategy::TokenBucket(bucket) => {
                bucket.refill(now);
                (
                    RateLimitStrategy::TokenBucket,
                    bucket.rate,
                    bucket.capacity as u32,
                    bucket.tokens,
                )
            }
            Strategy::SlidingWindow(window) => {
                window.evict(now);
                let capacity = window.capacity();
                (
                    RateLimitStrategy::SlidingWindow,
                    window.limit / window.window.as_secs_f64(),
                    capacity,
                    capacity.saturating_sub(window.calls.len() as u32) as f64,
                )
            }
            Strategy::Adaptive(adaptive) => {
                adaptive.bucket.refill(now);
                (
                    RateLimitStrategy::Adaptive,
                    adaptive.bucket.rate,
                    adaptive.bucket.capacity as u32,
                    adaptive.bucket.tokens,
                )
            }
        };
        RateLimiterSnapshot {
            endpoint: self.endpoint.clone(),
            strategy: Some(kind),
            rate: Some(rate),
            capacity: Some(capacity),
            available: Some(available),
        }
    }

    fn refund(&self, n: u32, stamp: Instant) {
        if let Some(strategy) = &self.strategy {
            lock(strategy).refund(n, stamp);
        }
    }
}

fn lock(strategy: &Mutex<Strategy>) -> MutexGuard<'_, Strategy> {
    strategy.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Seconds to a `Duration`, saturating at `Duration::MAX` for waits too long to represent.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn check_rate(rate: f64) -> Result<(), RateLimitError> {
    if rate > 0.0 && rate.is_finite() {
        Ok(())
    } else {
        Err(RateLimitError::InvalidRate(rate))
    }
}

/// Permits taken from a limiter.
///
/// Dropping an uncommitted permit gives them back.
#[derive(Debug)]
pub struct RatePermit {
    limiter: Option<Arc<RateLimiter>>,
    permits: u32,
    stamp: Instant,
    committed: bool,
}

impl RatePermit {
    fn free() -> Self {
        Self {
            limiter: None,
            permits: 0,
            stamp: Instant::now(),
            committed: true,
        }
    }

    /// Mark the permits as spent; call right before dispatch.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(limiter) = &self.limiter {
            limiter.refund(self.permits, self.stamp);
        }
    }
}

/// Lazily creates one limiter per endpoint.
#[derive(Debug)]
pub struct RateLimiterManager {
    default: RateLimitConfig,
    overrides: HashMap<String, RateLimitConfig>,
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl RateLimiterManager {
    /// `overrides` are keyed by normalized endpoint URL.
    pub fn new(default: RateLimitConfig, overrides: HashMap<String, RateLimitConfig>) -> Self {
        Self {
            default,
            overrides,
            limiters: DashMap::new(),
        }
    }

    pub fn limiter_for(&self, endpoint: &Endpoint) -> Result<Arc<RateLimiter>, RateLimitError> {
        let key = endpoint.as_str();
        if let Some(limiter) = self.limiters.get(key) {
            return Ok(Arc::clone(limiter.value()));
        }

        let config = self.overrides.get(key).unwrap_or(&self.default);
        let limiter = Arc::new(RateLimiter::from_config(key, config)?);
        let entry = self.limiters.entry(key.to_string()).or_insert(limiter);
        Ok(Arc::clone(entry.value()))
    }

    pub fn snapshot(&self) -> Vec<RateLimiterSnapshot> {
        let mut snapshots: Vec<_> = self
            .limiters
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        snapshots
    }
}
