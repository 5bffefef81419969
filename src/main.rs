//! rpc-tester
//!
//! Load-tests JSON-RPC endpoints and prints per (endpoint, method) statistics.
//!
//! # Architecture Overview
//!
//! ```text
//!   config file / CLI flags
//!            │
//!            ▼
//!   ┌─────────────────┐     ┌──────────────────────────────────────────────┐
//!   │     config      │────▶│                orchestrator                  │
//!   │ load + validate │     │  workers ─▶ rate limit ─▶ circuit breaker    │
//!   └─────────────────┘     │          ─▶ concurrency slot ─▶ retry policy │
//!                           │          ─▶ dispatcher ──HTTP POST──▶ endpoint
//!                           │                    │                          │
//!                           │                    ▼                          │
//!                           │            stats (per batch)                 │
//!                           └────────────────────┬─────────────────────────┘
//!                                                ▼
//!                                  AggregatedStats as JSON on stdout
//!
//!   Cross-cutting: observability (tracing, Prometheus), lifecycle (Ctrl-C)
//! ```

use std::path::PathBuf;

use clap::Parser;

use rpc_tester::config::{load_config, validate_config, ConfigError, TesterConfig};
use rpc_tester::lifecycle::signals::cancel_on_ctrl_c;
use rpc_tester::lifecycle::Shutdown;
use rpc_tester::observability::{logging, metrics};
use rpc_tester::orchestrator::{Hook, TestOrchestrator};

#[derive(Parser)]
#[command(name = "rpc-tester")]
#[command(
    about = "Measure latency and reliability of JSON-RPC endpoints under load",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Config file (.toml or .json), validated before flags are applied
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Endpoint URL to test; repeat for several. Replaces the configured list.
    #[arg(short, long = "endpoint")]
    endpoints: Vec<String>,

    /// Requests per endpoint and method
    #[arg(short = 'n', long)]
    requests: Option<u64>,

    /// Maximum in-flight requests per batch
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// RPC method to call; repeat for several. Replaces the configured list.
    #[arg(short, long = "method")]
    methods: Vec<String>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut TesterConfig) {
        if !self.endpoints.is_empty() {
            config.endpoints = self.endpoints;
        }
        if !self.methods.is_empty() {
            config.test_methods = self.methods;
        }
        if let Some(requests) = self.requests {
            config.test.num_requests = requests;
        }
        if let Some(concurrency) = self.concurrency {
            config.test.concurrency = concurrency;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut cli = Cli::parse();

    let mut config = match cli.config.take() {
        Some(path) => load_config(&path)?,
        None => TesterConfig::default(),
    };
    cli.apply(&mut config);

    logging::init_logging(&config.observability.log_level)?;
    tracing::info!("rpc-tester v{} starting", env!("CARGO_PKG_VERSION"));

    validate_config(&config).map_err(ConfigError::Validation)?;

    tracing::info!(
        endpoints = config.endpoints.len(),
        methods = config.test_methods.len(),
        requests = config.test.num_requests,
        concurrency = config.test.concurrency,
        timeout_ms = config.test.timeout_ms,
        retry_attempts = config.test.retry_attempts,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    cancel_on_ctrl_c(shutdown.clone());

    let metrics_enabled = config.observability.metrics_enabled;
    let mut orchestrator = TestOrchestrator::new(config)?
        .with_shutdown(shutdown.clone())
        .with_hook(Hook::Tracing);
    if metrics_enabled {
        orchestrator = orchestrator.with_hook(Hook::Metrics);
    }

    let results = orchestrator.run_configured().await?;
    for stats in &results {
        println!("{}", serde_json::to_string_pretty(stats)?);
    }

    tracing::debug!(
        snapshot = %serde_json::to_string(&orchestrator.resilience_snapshot())?,
        "Resilience state"
    );

    if shutdown.is_triggered() {
        tracing::warn!("Run cancelled before completion");
    }
    tracing::info!("Run complete");
    Ok(())
}
