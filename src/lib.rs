//! Concurrent JSON-RPC endpoint tester.
//!
//! Sends batches of JSON-RPC calls to HTTP endpoints under bounded
//! concurrency, with retries, per-endpoint circuit breaking and rate
//! limiting, and aggregates the outcomes into latency distributions.

pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod limits;
pub mod observability;
pub mod orchestrator;
pub mod resilience;
pub mod stats;

pub use config::schema::TesterConfig;
pub use dispatch::{Dispatch, Dispatcher, Endpoint, RequestOutcome, RpcMethod};
pub use lifecycle::Shutdown;
pub use orchestrator::TestOrchestrator;
pub use stats::AggregatedStats;
