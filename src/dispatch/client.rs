//! HTTP dispatcher: one JSON-RPC POST per call, no retries.

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::time::timeout;

use crate::dispatch::jsonrpc::{classify_response, JsonRpcRequest};
use crate::dispatch::types::{Endpoint, OutcomeError, RequestOutcome, RpcMethod};

/// One network call.
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    pub endpoint: &'a Endpoint,
    pub method: &'a RpcMethod,
    /// Used as the JSON-RPC `id`.
    pub sequence: u64,
    pub timeout: Duration,
}

/// Issues a single call attempt and classifies its outcome.
pub trait Dispatch: Send + Sync + 'static {
    fn attempt(&self, attempt: Attempt<'_>) -> impl Future<Output = RequestOutcome> + Send;
}

/// reqwest-backed dispatcher sharing one connection pool across tasks.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: Client,
}

impl Dispatcher {
    /// Build a dispatcher whose pool keeps up to `max_idle_per_host` idle connections.
    pub fn new(max_idle_per_host: usize) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_idle_per_host)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Dispatch for Dispatcher {
    async fn attempt(&self, attempt: Attempt<'_>) -> RequestOutcome {
        let body = JsonRpcRequest::new(
            attempt.sequence,
            attempt.method.name(),
            attempt.method.params(),
        );
        let start = Instant::now();

        let call = async {
            let response = self
                .client
                .post(attempt.endpoint.url().clone())
                .json(&body)
                .send()
                .await?;
            let status = response.status().as_u16();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes))
        };

        match timeout(attempt.timeout, call).await {
            Ok(Ok((status, bytes))) => {
                let outcome = classify_response(status, &bytes, elapsed_ms(start));
                if outcome.is_success() {
                    tracing::debug!(
                        endpoint = %attempt.endpoint,
                        method = attempt.method.name(),
                        latency_ms = outcome.latency_ms(),
                        "Request succeeded"
                    );
                } else {
                    tracing::warn!(
                        endpoint = %attempt.endpoint,
                        method = attempt.method.name(),
                        status,
                        error = ?outcome.error(),
                        "Request failed"
                    );
                }
                outcome
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    endpoint = %attempt.endpoint,
                    method = attempt.method.name(),
                    error = %e,
                    "Connection error"
                );
                RequestOutcome::failure(
                    classify_reqwest(&e, attempt.timeout),
                    Some(elapsed_ms(start)),
                    None,
                )
            }
            Err(_) => {
                tracing::warn!(
                    endpoint = %attempt.endpoint,
                    method = attempt.method.name(),
                    timeout_ms = attempt.timeout.as_millis() as u64,
                    "Request timed out"
                );
                RequestOutcome::failure(
                    OutcomeError::Timeout(attempt.timeout.as_millis() as u64),
                    Some(elapsed_ms(start)),
                    None,
                )
            }
        }
    }
}

/// Map a reqwest failure onto the outcome taxonomy.
pub fn classify_reqwest(err: &reqwest::Error, timeout: Duration) -> OutcomeError {
    if err.is_timeout() {
        OutcomeError::Timeout(timeout.as_millis() as u64)
    } else {
        OutcomeError::Connection(err.to_string())
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
