//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a test run.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::{Endpoint, RpcMethod};

/// Root configuration for the tester.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TesterConfig {
    /// Endpoint URLs under test.
    pub endpoints: Vec<String>,

    /// Batch size, concurrency, timeouts and retries.
    pub test: TestConfig,

    /// RPC methods to call against every endpoint.
    pub test_methods: Vec<String>,

    /// Explicit params per method, replacing the built-in defaults.
    pub method_params: BTreeMap<String, Vec<Value>>,

    /// Address used by `eth_getBalance`.
    pub test_address: Option<String>,

    /// Default rate limiting for every endpoint.
    pub rate_limit: RateLimitConfig,

    /// Default circuit breaker for every endpoint.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Per-endpoint overrides, keyed by endpoint URL.
    pub overrides: BTreeMap<String, EndpointOverride>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            test: TestConfig::default(),
            test_methods: vec![
                "eth_blockNumber".to_string(),
                "eth_chainId".to_string(),
                "eth_gasPrice".to_string(),
                "net_version".to_string(),
            ],
            method_params: BTreeMap::new(),
            test_address: None,
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            overrides: BTreeMap::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl TesterConfig {
    /// Parse every configured endpoint URL.
    pub fn parsed_endpoints(&self) -> Result<Vec<Endpoint>, url::ParseError> {
        self.endpoints.iter().map(|raw| Endpoint::parse(raw)).collect()
    }

    /// Configured methods with their resolved params.
    pub fn rpc_methods(&self) -> Vec<RpcMethod> {
        self.test_methods
            .iter()
            .map(|name| RpcMethod::with_params(name.as_str(), self.params_for(name)))
            .collect()
    }

    /// Params for `method`: an explicit `method_params` entry wins, then the
    /// built-in default.
    pub fn params_for(&self, method: &str) -> Vec<Value> {
        match self.method_params.get(method) {
            Some(params) => params.clone(),
            None => default_params(method, self.test_address.as_deref()),
        }
    }
}

/// Built-in params for well-known Ethereum methods; `[]` otherwise.
pub fn default_params(method: &str, test_address: Option<&str>) -> Vec<Value> {
    match (method, test_address) {
        ("eth_getBalance", Some(address)) => {
            vec![Value::from(address), Value::from("latest")]
        }
        ("eth_call", _) => vec![
            serde_json::json!({
                "to": "0x0000000000000000000000000000000000000000",
                "data": "0x",
            }),
            Value::from("latest"),
        ],
        ("eth_getLogs", _) => vec![serde_json::json!({
            "fromBlock": "latest",
            "toBlock": "latest",
        })],
        _ => Vec::new(),
    }
}

/// Batch execution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TestConfig {
    /// Logical requests per (endpoint, method) pair.
    pub num_requests: u64,

    /// Maximum in-flight requests per batch.
    pub concurrency: usize,

    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,

    /// Total tries per logical request, including the first.
    pub retry_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_retry_delay_ms: u64,

    /// Add up to 10% random jitter to each backoff.
    pub retry_jitter: bool,

    /// Cancel a batch still running after this many seconds.
    pub batch_deadline_secs: Option<u64>,
}

impl TestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline_secs.map(Duration::from_secs)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            num_requests: 10,
            concurrency: 5,
            timeout_ms: 30_000,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            retry_jitter: false,
            batch_deadline_secs: None,
        }
    }
}

/// Rate limiting algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    TokenBucket,
    SlidingWindow,
    Adaptive,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    pub strategy: RateLimitStrategy,

    /// Sustained (or initial, for adaptive) requests per second.
    pub requests_per_second: f64,

    /// Burst capacity; defaults to `max(1, floor(requests_per_second))`.
    pub burst_size: Option<u32>,

    /// Trailing window length for the sliding-window strategy.
    pub window_secs: f64,

    /// Tuning for the adaptive strategy.
    pub adaptive: AdaptiveRateConfig,
}

impl RateLimitConfig {
    /// Effective burst capacity.
    pub fn burst(&self) -> u32 {
        match self.burst_size {
            Some(burst) => burst,
            None => (self.requests_per_second.floor() as u32).max(1),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: RateLimitStrategy::TokenBucket,
            requests_per_second: 10.0,
            burst_size: None,
            window_secs: 1.0,
            adaptive: AdaptiveRateConfig::default(),
        }
    }
}

/// Adaptive rate limiter tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdaptiveRateConfig {
    pub min_rate: f64,
    pub max_rate: f64,

    /// Multiplier applied after `success_streak` consecutive successes.
    pub increase_factor: f64,

    /// Multiplier applied on throttling or after `error_streak` errors.
    pub decrease_factor: f64,

    pub success_streak: u32,
    pub error_streak: u32,
}

impl Default for AdaptiveRateConfig {
    fn default() -> Self {
        Self {
            min_rate: 1.0,
            max_rate: 100.0,
            increase_factor: 1.2,
            decrease_factor: 0.5,
            success_streak: 10,
            error_streak: 3,
        }
    }
}

/// Circuit breaker trip condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStrategy {
    /// Open after `failure_threshold` consecutive failures.
    Consecutive,
    /// Open when more than half of the last `window_size` calls failed.
    Adaptive,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaking.
    pub enabled: bool,

    pub strategy: CircuitStrategy,

    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,

    /// Time spent open before trial calls are allowed, in milliseconds.
    pub open_timeout_ms: u64,

    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,

    /// Outcomes remembered by the adaptive strategy.
    pub window_size: usize,

    /// Outcomes required before the adaptive error rate is evaluated.
    pub min_calls: usize,
}

impl CircuitBreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: CircuitStrategy::Consecutive,
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_ms: 60_000,
            half_open_max_calls: 3,
            window_size: 100,
            min_calls: 10,
        }
    }
}

/// Settings that replace the defaults for one endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointOverride {
    pub rate_limit: Option<RateLimitConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TesterConfig::default();
        assert_eq!(config.test.num_requests, 10);
        assert_eq!(config.test.concurrency, 5);
        assert_eq!(config.test.timeout(), Duration::from_secs(30));
        assert_eq!(config.test_methods.len(), 4);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.burst(), 10);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TesterConfig = toml::from_str(
            r#"
            endpoints = ["http://localhost:8545"]

            [test]
            concurrency = 20

            [rate_limit]
            enabled = true
            strategy = "sliding_window"
            requests_per_second = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.test.concurrency, 20);
        assert_eq!(config.test.num_requests, 10);
        assert_eq!(config.rate_limit.strategy, RateLimitStrategy::SlidingWindow);
        assert_eq!(config.rate_limit.burst(), 2);
    }

    #[test]
    fn test_default_params() {
        let mut config = TesterConfig::default();
        assert!(config.params_for("eth_getBalance").is_empty());

        config.test_address = Some("0x1234567890123456789012345678901234567890".into());
        assert_eq!(
            config.params_for("eth_getBalance"),
            vec![
                Value::from("0x1234567890123456789012345678901234567890"),
                Value::from("latest")
            ]
        );
        assert_eq!(config.params_for("eth_call").len(), 2);
        assert_eq!(
            config.params_for("eth_getLogs"),
            vec![serde_json::json!({"fromBlock": "latest", "toBlock": "latest"})]
        );
        assert!(config.params_for("eth_blockNumber").is_empty());
    }

    #[test]
    fn test_method_params_override_defaults() {
        let mut config = TesterConfig::default();
        config
            .method_params
            .insert("eth_getLogs".into(), vec![serde_json::json!({"fromBlock": "0x1"})]);
        config.test_methods = vec!["eth_getLogs".into()];

        let methods = config.rpc_methods();
        assert_eq!(methods[0].params(), &serde_json::json!([{"fromBlock": "0x1"}]));
    }
}
