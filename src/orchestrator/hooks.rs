//! Request lifecycle hooks.
//!
//! A closed set of observers called by the orchestrator around every
//! logical request. Hooks run inline on the worker task and must not block.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::dispatch::{Endpoint, RequestOutcome, RpcMethod};
use crate::observability::metrics;

/// What a hook knows about the request it observes.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub run_id: Uuid,
    pub endpoint: &'a Endpoint,
    pub method: &'a RpcMethod,
    /// Also the JSON-RPC id.
    pub sequence: u64,
}

/// Built-in observers.
#[derive(Debug, Clone)]
pub enum Hook {
    /// Emit a tracing event per request.
    Tracing,
    /// Record Prometheus metrics per request.
    Metrics,
    /// Count requests in shared atomics.
    Counter(RequestCounter),
}

impl Hook {
    pub fn on_request_start(&self, ctx: &RequestContext<'_>) {
        match self {
            Self::Tracing => tracing::trace!(
                run_id = %ctx.run_id,
                endpoint = %ctx.endpoint,
                method = ctx.method.name(),
                sequence = ctx.sequence,
                "Request started"
            ),
            Self::Metrics => {}
            Self::Counter(counter) => counter.start(),
        }
    }

    pub fn on_request_complete(&self, ctx: &RequestContext<'_>, outcome: &RequestOutcome) {
        match self {
            Self::Tracing => tracing::debug!(
                run_id = %ctx.run_id,
                endpoint = %ctx.endpoint,
                method = ctx.method.name(),
                sequence = ctx.sequence,
                attempt = outcome.attempt(),
                latency_ms = outcome.latency_ms(),
                "Request completed"
            ),
            Self::Metrics => metrics::record_outcome(ctx.endpoint, ctx.method, outcome),
            Self::Counter(counter) => counter.finish(false),
        }
    }

    pub fn on_request_error(&self, ctx: &RequestContext<'_>, outcome: &RequestOutcome) {
        match self {
            Self::Tracing => tracing::debug!(
                run_id = %ctx.run_id,
                endpoint = %ctx.endpoint,
                method = ctx.method.name(),
                sequence = ctx.sequence,
                attempt = outcome.attempt(),
                kind = ?outcome.error_kind(),
                error = ?outcome.error(),
                "Request failed"
            ),
            Self::Metrics => metrics::record_outcome(ctx.endpoint, ctx.method, outcome),
            Self::Counter(counter) => counter.finish(true),
        }
    }

    /// The request was abandoned without an outcome.
    pub fn on_request_cancelled(&self, ctx: &RequestContext<'_>) {
        match self {
            Self::Tracing => tracing::trace!(
                run_id = %ctx.run_id,
                sequence = ctx.sequence,
                "Request cancelled"
            ),
            Self::Metrics => {}
            Self::Counter(counter) => counter.cancel(),
        }
    }
}

/// Shared request counters; clones observe the same values.
#[derive(Debug, Clone, Default)]
pub struct RequestCounter {
    inner: Arc<CounterState>,
}

#[derive(Debug, Default)]
struct CounterState {
    started: AtomicU64,
    completed: AtomicU64,
    errored: AtomicU64,
    cancelled: AtomicU64,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self) {
        self.inner.started.fetch_add(1, Ordering::Relaxed);
        let now = self.inner.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak.fetch_max(now, Ordering::AcqRel);
    }

    fn finish(&self, errored: bool) {
        if errored {
            self.inner.errored.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.completed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn cancel(&self) {
        self.inner.cancelled.fetch_add(1, Ordering::Relaxed);
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn started(&self) -> u64 {
        self.inner.started.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    pub fn errored(&self) -> u64 {
        self.inner.errored.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> u64 {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of requests between start and finish at once.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak.load(Ordering::Acquire)
    }
}
