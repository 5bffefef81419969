//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Logical request:
//!     → circuit_breaker.rs (admit, or fail fast while open)
//!     → retries.rs (dispatch, classify, back off and retry if retryable)
//!         → backoff.rs (base * 2^(attempt-1), capped)
//!     → circuit_breaker.rs (record success/failure on the permit)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every attempt has a deadline
//! - Only transport-level failures are retried; answers are final
//! - Circuit breaker keeps a failing endpoint from being hammered
//! - Breaker state lives behind a mutex that is never held across an await

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{
    CircuitBreaker, CircuitOpenError, CircuitPermit, CircuitSnapshot, CircuitState,
};
pub use retries::RetryPolicy;
