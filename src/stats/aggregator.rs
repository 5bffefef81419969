//! Per (endpoint, method) outcome accumulator.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::dispatch::{ErrorKind, RequestOutcome};
use crate::stats::percentile::percentile;

/// Most recent error messages kept per batch.
pub const MAX_RECENT_ERRORS: usize = 10;

/// Finalized statistics for one (endpoint, method) batch.
///
/// Latencies are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedStats {
    pub endpoint: String,
    pub method: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percent, 0.0 to 100.0.
    pub success_rate: f64,
    /// Attempts consumed including retries.
    pub total_attempts: u64,
    pub avg_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub median: f64,
    pub p50_latency: f64,
    pub p90_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    /// Outcomes that contributed a latency sample.
    pub sample_count: usize,
    /// Ascending latency samples.
    #[serde(skip)]
    pub latencies: Vec<f64>,
    /// Most recent error messages, oldest first.
    pub errors: Vec<String>,
    pub error_breakdown: BTreeMap<ErrorKind, u64>,
    /// The batch stopped before every request ran.
    pub cancelled: bool,
}

/// Single-owner accumulator; feed it outcomes, then finalize.
#[derive(Debug, Clone)]
pub struct StatisticsEngine {
    endpoint: String,
    method: String,
    successful: u64,
    failed: u64,
    attempts: u64,
    latencies: Vec<f64>,
    errors: VecDeque<String>,
    breakdown: BTreeMap<ErrorKind, u64>,
    cancelled: bool,
}

impl StatisticsEngine {
    pub fn new(endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            successful: 0,
            failed: 0,
            attempts: 0,
            latencies: Vec::new(),
            errors: VecDeque::with_capacity(MAX_RECENT_ERRORS),
            breakdown: BTreeMap::new(),
            cancelled: false,
        }
    }

    pub fn record(&mut self, outcome: &RequestOutcome) {
        self.attempts += u64::from(outcome.attempt());
        if let Some(latency) = outcome.latency_ms() {
            self.latencies.push(latency);
        }

        match outcome.error() {
            None => self.successful += 1,
            Some(error) => {
                self.failed += 1;
                *self.breakdown.entry(error.kind()).or_insert(0) += 1;
                if self.errors.len() == MAX_RECENT_ERRORS {
                    self.errors.pop_front();
                }
                self.errors.push_back(error.to_string());
            }
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn total(&self) -> u64 {
        self.successful + self.failed
    }

    /// Statistics so far, leaving the engine usable.
    pub fn snapshot(&self) -> AggregatedStats {
        self.clone().finalize()
    }

    pub fn finalize(self) -> AggregatedStats {
        let total = self.total();
        let mut latencies = self.latencies;
        latencies.sort_by(f64::total_cmp);

        let n = latencies.len();
        let (avg, min, max, std_dev) = if n == 0 {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let mean = latencies.iter().sum::<f64>() / n as f64;
            let variance = latencies.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
            (mean, latencies[0], latencies[n - 1], variance.sqrt())
        };
        let p50 = percentile(&latencies, 0.50);

        AggregatedStats {
            endpoint: self.endpoint,
            method: self.method,
            total_requests: total,
            successful_requests: self.successful,
            failed_requests: self.failed,
            success_rate: if total == 0 {
                0.0
            } else {
                self.successful as f64 / total as f64 * 100.0
            },
            total_attempts: self.attempts,
            avg_latency: avg,
            min_latency: min,
            max_latency: max,
            std_dev,
            median: p50,
            p50_latency: p50,
            p90_latency: percentile(&latencies, 0.90),
            p95_latency: percentile(&latencies, 0.95),
            p99_latency: percentile(&latencies, 0.99),
            sample_count: n,
            latencies,
            errors: self.errors.into(),
            error_breakdown: self.breakdown,
            cancelled: self.cancelled,
        }
    }
}
