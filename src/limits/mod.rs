//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Logical request:
//!     → rate_limit.rs (per-endpoint token bucket / sliding window / adaptive)
//!     → circuit breaker (see resilience)
//!     → concurrency.rs (per-batch slot)
//!     → dispatch
//! ```
//!
//! # Design Decisions
//! - Rate state is per endpoint and outlives batches; slots are per batch
//! - Every acquisition returns an RAII guard
//! - Waits race the cancellation token; locks are never held across them

pub mod concurrency;
pub mod rate_limit;

pub use concurrency::{ConcurrencyLimiter, ConcurrencySlot};
pub use rate_limit::{
    RateLimitError, RateLimiter, RateLimiterManager, RateLimiterSnapshot, RatePermit,
};
