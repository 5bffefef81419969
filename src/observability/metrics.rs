//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rpc_requests_total` (counter): logical requests by endpoint, method, outcome
//! - `rpc_request_duration_seconds` (histogram): final-attempt latency
//! - `rpc_retries_total` (counter): extra attempts by endpoint, method
//! - `rpc_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `rpc_circuit_transitions_total` (counter): breaker transitions by target state
//! - `rpc_rate_limit_wait_seconds` (histogram): time spent waiting for admission

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::dispatch::{Endpoint, RequestOutcome, RpcMethod};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one finished logical request.
pub fn record_outcome(endpoint: &Endpoint, method: &RpcMethod, outcome: &RequestOutcome) {
    let label = match outcome.error_kind() {
        None => "success",
        Some(kind) => kind.as_str(),
    };
    metrics::counter!(
        "rpc_requests_total",
        "endpoint" => endpoint.to_string(),
        "method" => method.name().to_string(),
        "outcome" => label
    )
    .increment(1);

    if let Some(latency_ms) = outcome.latency_ms() {
        metrics::histogram!(
            "rpc_request_duration_seconds",
            "endpoint" => endpoint.to_string(),
            "method" => method.name().to_string()
        )
        .record(latency_ms / 1000.0);
    }
}

pub fn record_retry(endpoint: &Endpoint, method: &RpcMethod) {
    metrics::counter!(
        "rpc_retries_total",
        "endpoint" => endpoint.to_string(),
        "method" => method.name().to_string()
    )
    .increment(1);
}

/// `state` is 0 (closed), 1 (half-open) or 2 (open).
pub fn record_circuit_state(breaker: &str, state: u8, state_name: &'static str) {
    metrics::gauge!("rpc_circuit_state", "breaker" => breaker.to_string()).set(f64::from(state));
    metrics::counter!(
        "rpc_circuit_transitions_total",
        "breaker" => breaker.to_string(),
        "to" => state_name
    )
    .increment(1);
}

pub fn record_rate_limit_wait(endpoint: &str, waited_secs: f64) {
    metrics::histogram!("rpc_rate_limit_wait_seconds", "endpoint" => endpoint.to_string())
        .record(waited_secs);
}
