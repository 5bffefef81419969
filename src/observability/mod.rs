//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, batch spans with run_id)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stderr/stdout via the fmt layer
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every batch runs inside a span carrying its run_id
//! - Metrics are cheap facade calls; without an installed recorder they are no-ops
//! - Log level comes from RUST_LOG first, config second

pub mod logging;
pub mod metrics;
