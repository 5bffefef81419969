//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → root token cancelled
//!         → batch child tokens cancelled
//!         → rate waits, slot waits, dispatches and backoff sleeps return Cancelled
//!
//! Signals (signals.rs):
//!     SIGINT (Ctrl-C) → Shutdown::trigger
//! ```
//!
//! # Design Decisions
//! - One root token per process; every batch works on a child token
//! - A batch deadline cancels its child token without touching siblings
//! - Cancellation never records an outcome; guards release what was held

pub mod shutdown;
pub mod signals;

pub use shutdown::{Cancelled, Shutdown};
