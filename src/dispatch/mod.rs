//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt (endpoint, method, id, timeout)
//!     → jsonrpc.rs (build request body)
//!     → client.rs (POST with per-request timeout)
//!     → jsonrpc.rs (classify status + body)
//!     → RequestOutcome
//! ```
//!
//! # Design Decisions
//! - One call, one classification; retry decisions live in `resilience`
//! - Non-200 statuses are transport failures carrying the status code
//! - An `error` member in a 200 response is an application failure
//! - The per-request timeout is enforced here, independent of batch deadlines

pub mod client;
pub mod jsonrpc;
pub mod types;

pub use client::{Attempt, Dispatch, Dispatcher};
pub use types::{Disposition, Endpoint, ErrorKind, OutcomeError, RequestOutcome, RpcMethod};
