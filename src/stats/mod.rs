//! Statistics subsystem.
//!
//! # Data Flow
//! ```text
//! worker tasks ──RequestOutcome──▶ mpsc ──▶ aggregator.rs (StatisticsEngine)
//!                                                 │ finalize
//!                                                 ▼
//!                                  AggregatedStats (percentile.rs)
//! ```
//!
//! # Design Decisions
//! - One owner per batch; no lock on the hot path
//! - Finalization sorts with a total order, so completion order never matters
//! - Outcomes without a latency count toward totals only

pub mod aggregator;
pub mod percentile;

pub use aggregator::{AggregatedStats, StatisticsEngine, MAX_RECENT_ERRORS};
pub use percentile::percentile;
