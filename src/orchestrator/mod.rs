//! Test orchestration subsystem.
//!
//! # Data Flow
//! ```text
//! test_endpoint(endpoint, method, N)
//!     → spawn min(concurrency, N) workers on a TaskTracker
//!     → each worker pulls the next sequence number, then:
//!         rate limiter (registry.rs) → circuit breaker (registry.rs)
//!         → concurrency slot → RetryPolicy → Dispatcher
//!     → outcome feeds the breaker, the adaptive limiter and hooks.rs
//!     → outcome sent over mpsc to the batch's StatisticsEngine
//!     → AggregatedStats (retained per endpoint and method)
//! ```
//!
//! # Design Decisions
//! - Endpoint state lives in an explicit registry owned by the orchestrator
//! - Every batch runs on a child of the shutdown token
//! - A panicking request is recorded as `Internal`; siblings keep running
//! - Cancelled requests are never recorded

pub mod hooks;
pub mod registry;
pub mod runner;

pub use hooks::{Hook, RequestContext, RequestCounter};
pub use registry::{EndpointRegistry, ResilienceSnapshot};
pub use runner::{OrchestratorError, TestOrchestrator};
