//! Retry logic.
//!
//! # Responsibilities
//! - Classify each attempt's outcome (success, retryable, terminal)
//! - Reissue retryable failures with exponential backoff
//! - Stop at `attempts_max` total tries
//!
//! # Design Decisions
//! - Only timeouts, connection failures and HTTP 5xx are retried
//! - Never sleeps after the final attempt
//! - Dispatch and backoff both race the cancellation token
//! - The JSON-RPC id is stable across retries of one logical request

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::TestConfig;
use crate::dispatch::{Attempt, Dispatch, Disposition, Endpoint, RequestOutcome, RpcMethod};
use crate::lifecycle::Cancelled;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Attempt budget and backoff shape for one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first. Never below 1.
    pub attempts_max: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(attempts_max: u32, base_delay_ms: u64) -> Self {
        Self {
            attempts_max: attempts_max.max(1),
            base_delay_ms,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }

    pub fn with_max_delay(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn from_config(config: &TestConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_delay_ms)
            .with_max_delay(config.max_retry_delay_ms)
            .with_jitter(config.retry_jitter)
    }

    /// Backoff after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms, self.jitter)
    }

    /// Run one logical request to completion.
    ///
    /// Returns the last outcome with its attempt count, or `Cancelled` if the
    /// token fired during a dispatch or a backoff sleep.
    pub async fn execute<D: Dispatch>(
        &self,
        dispatcher: &D,
        endpoint: &Endpoint,
        method: &RpcMethod,
        timeout: Duration,
        request_id: u64,
        cancel: &CancellationToken,
    ) -> Result<RequestOutcome, Cancelled> {
        let mut attempt = 1;
        loop {
            let call = dispatcher.attempt(Attempt {
                endpoint,
                method,
                sequence: request_id,
                timeout,
            });
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                outcome = call => outcome.with_attempt(attempt),
            };

            if outcome.disposition() != Disposition::Retryable || attempt >= self.attempts_max {
                return Ok(outcome);
            }

            let delay = self.delay_for(attempt);
            tracing::debug!(
                endpoint = %endpoint,
                method = method.name(),
                request_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = ?outcome.error(),
                "Retrying request"
            );
            metrics::record_retry(endpoint, method);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TestConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::OutcomeError;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    /// Replays a fixed script of outcomes, then repeats the last one.
    struct Scripted {
        script: Mutex<VecDeque<RequestOutcome>>,
        calls: AtomicU32,
        ids: Mutex<Vec<u64>>,
    }

    impl Scripted {
        fn new(script: Vec<RequestOutcome>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                ids: Mutex::new(Vec::new()),
            }
        }
    }

    impl Dispatch for Scripted {
        async fn attempt(&self, attempt: Attempt<'_>) -> RequestOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ids.lock().unwrap().push(attempt.sequence);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn http(status: u16) -> RequestOutcome {
        RequestOutcome::failure(
            OutcomeError::Http {
                status,
                body: String::new(),
            },
            Some(1.0),
            Some(status),
        )
    }

    fn ok() -> RequestOutcome {
        RequestOutcome::success(1.0, 200, Value::from("0x10"))
    }

    fn endpoint() -> Endpoint {
        Endpoint::parse("http://localhost:8545").unwrap()
    }

    async fn run(policy: &RetryPolicy, dispatcher: &Scripted) -> Result<RequestOutcome, Cancelled> {
        policy
            .execute(
                dispatcher,
                &endpoint(),
                &RpcMethod::new("eth_blockNumber"),
                Duration::from_secs(1),
                42,
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_always_500_consumes_every_attempt() {
        let dispatcher = Scripted::new(vec![http(500)]);
        let outcome = run(&RetryPolicy::new(3, 1), &dispatcher).await.unwrap();
        assert!(!outcome.is_success());
        assert_eq!(outcome.attempt(), 3);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let dispatcher = Scripted::new(vec![http(500), http(500), ok()]);
        let outcome = run(&RetryPolicy::new(3, 1), &dispatcher).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.attempt(), 3);
        assert_eq!(*dispatcher.ids.lock().unwrap(), vec![42, 42, 42]);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_retried() {
        let dispatcher = Scripted::new(vec![http(404)]);
        let outcome = run(&RetryPolicy::new(5, 1), &dispatcher).await.unwrap();
        assert_eq!(outcome.attempt(), 1);

        let rpc = RequestOutcome::failure(
            OutcomeError::Rpc {
                code: -32000,
                message: "execution reverted".into(),
            },
            Some(1.0),
            Some(200),
        );
        let dispatcher = Scripted::new(vec![rpc]);
        let outcome = run(&RetryPolicy::new(5, 1), &dispatcher).await.unwrap();
        assert_eq!(outcome.attempt(), 1);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_sleep_after_final_attempt() {
        let dispatcher = Scripted::new(vec![http(503)]);
        let start = Instant::now();
        let outcome = run(&RetryPolicy::new(2, 100), &dispatcher).await.unwrap();
        assert_eq!(outcome.attempt(), 2);
        // One 100ms backoff between the two tries, none after.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(190));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let dispatcher = Scripted::new(vec![http(500)]);
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(3, 10_000);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = policy
            .execute(
                &dispatcher,
                &endpoint(),
                &RpcMethod::new("eth_blockNumber"),
                Duration::from_secs(1),
                1,
                &cancel,
            )
            .await;
        assert_eq!(result, Err(Cancelled));
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_formula() {
        let policy = RetryPolicy::new(4, 1000);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, 10).attempts_max, 1);
    }
}
