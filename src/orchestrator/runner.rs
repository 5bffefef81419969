//! Batch execution.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::TesterConfig;
use crate::dispatch::{Dispatch, Dispatcher, Endpoint, OutcomeError, RequestOutcome, RpcMethod};
use crate::lifecycle::{Cancelled, Shutdown};
use crate::limits::{ConcurrencyLimiter, RateLimitError, RateLimiter};
use crate::orchestrator::hooks::{Hook, RequestContext};
use crate::orchestrator::registry::{EndpointRegistry, ResilienceSnapshot};
use crate::resilience::{CircuitBreaker, RetryPolicy};
use crate::stats::{AggregatedStats, StatisticsEngine};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Runs batches of JSON-RPC requests and keeps their statistics.
#[derive(Debug)]
pub struct TestOrchestrator<D: Dispatch = Dispatcher> {
    config: Arc<TesterConfig>,
    dispatcher: Arc<D>,
    registry: EndpointRegistry,
    retry: RetryPolicy,
    hooks: Arc<Vec<Hook>>,
    shutdown: Shutdown,
    results: DashMap<(String, String), AggregatedStats>,
    request_ids: Arc<AtomicU64>,
}

impl TestOrchestrator<Dispatcher> {
    /// Orchestrator over a pooled HTTP dispatcher sized from `test.concurrency`.
    pub fn new(config: TesterConfig) -> Result<Self, OrchestratorError> {
        let dispatcher = Dispatcher::new(config.test.concurrency)?;
        Ok(Self::with_dispatcher(config, dispatcher))
    }
}

impl<D: Dispatch> TestOrchestrator<D> {
    pub fn with_dispatcher(config: TesterConfig, dispatcher: D) -> Self {
        Self {
            registry: EndpointRegistry::from_config(&config),
            retry: RetryPolicy::from_config(&config.test),
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            hooks: Arc::new(Vec::new()),
            shutdown: Shutdown::new(),
            results: DashMap::new(),
            request_ids: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a hook; hooks run in registration order.
    pub fn with_hook(mut self, hook: Hook) -> Self {
        Arc::make_mut(&mut self.hooks).push(hook);
        self
    }

    /// Use an externally owned shutdown coordinator.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &TesterConfig {
        &self.config
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Send `request_count` requests of `method` to `endpoint`.
    ///
    /// At most `test.concurrency` requests are in flight. Each request takes a
    /// rate permit, then a breaker permit, then a slot, then runs the retry
    /// policy. A panic inside one request becomes an `Internal` outcome.
    /// Cancellation stops the batch; requests it interrupts are not recorded
    /// and the result is flagged `cancelled`.
    pub async fn test_endpoint(
        &self,
        endpoint: &Endpoint,
        method: &RpcMethod,
        request_count: u64,
    ) -> AggregatedStats {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "batch",
            %run_id,
            endpoint = %endpoint,
            method = method.name()
        );
        self.run_batch(run_id, endpoint, method, request_count)
            .instrument(span)
            .await
    }

    async fn run_batch(
        &self,
        run_id: Uuid,
        endpoint: &Endpoint,
        method: &RpcMethod,
        request_count: u64,
    ) -> AggregatedStats {
        let test = &self.config.test;
        let cancel = self.shutdown.child_token();
        let workers = (test.concurrency.max(1) as u64).min(request_count);

        tracing::info!(
            requests = request_count,
            concurrency = test.concurrency,
            timeout_ms = test.timeout_ms,
            retry_attempts = self.retry.attempts_max,
            "Starting batch"
        );

        let deadline = test.batch_deadline().map(|limit| spawn_deadline(limit, cancel.clone()));

        let rate = self.registry.limiter_for(endpoint);
        if let Err(e) = &rate {
            tracing::error!(error = %e, "Rate limiter unavailable");
        }

        let batch = Arc::new(Batch {
            run_id,
            endpoint: endpoint.clone(),
            method: method.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            retry: self.retry.clone(),
            timeout: test.timeout(),
            rate,
            breaker: self.registry.breaker_for(endpoint),
            slots: Arc::new(ConcurrencyLimiter::new(test.concurrency)),
            hooks: Arc::clone(&self.hooks),
            cancel: cancel.clone(),
            request_ids: Arc::clone(&self.request_ids),
        });

        let next = Arc::new(AtomicU64::new(0));
        let (tx, mut rx) = mpsc::channel::<RequestOutcome>((workers as usize).max(1) * 2);
        let tracker = TaskTracker::new();
        for _ in 0..workers {
            tracker.spawn(
                worker(Arc::clone(&batch), Arc::clone(&next), request_count, tx.clone())
                    .in_current_span(),
            );
        }
        drop(tx);
        tracker.close();

        let mut engine = StatisticsEngine::new(endpoint.as_str(), method.name());
        while let Some(outcome) = rx.recv().await {
            engine.record(&outcome);
        }
        tracker.wait().await;

        if let Some(handle) = deadline {
            handle.abort();
        }
        if engine.total() < request_count {
            engine.mark_cancelled();
        }

        let stats = engine.finalize();
        tracing::info!(
            total = stats.total_requests,
            successful = stats.successful_requests,
            failed = stats.failed_requests,
            success_rate = stats.success_rate,
            p50_ms = stats.p50_latency,
            p95_ms = stats.p95_latency,
            p99_ms = stats.p99_latency,
            cancelled = stats.cancelled,
            "Batch complete"
        );

        self.results.insert(
            (endpoint.as_str().to_string(), method.name().to_string()),
            stats.clone(),
        );
        stats
    }

    /// Run every (endpoint, method) pair, one batch at a time.
    ///
    /// Stops early once shutdown is triggered.
    pub async fn test_all(
        &self,
        endpoints: &[Endpoint],
        methods: &[RpcMethod],
        request_count: u64,
    ) -> Vec<AggregatedStats> {
        let mut all = Vec::with_capacity(endpoints.len() * methods.len());
        for endpoint in endpoints {
            for method in methods {
                if self.shutdown.is_triggered() {
                    tracing::warn!("Shutdown requested, skipping remaining batches");
                    return all;
                }
                all.push(self.test_endpoint(endpoint, method, request_count).await);
            }
        }
        all
    }

    /// Run the endpoints, methods and request count from the config.
    pub async fn run_configured(&self) -> Result<Vec<AggregatedStats>, url::ParseError> {
        let endpoints = self.config.parsed_endpoints()?;
        let methods = self.config.rpc_methods();
        Ok(self
            .test_all(&endpoints, &methods, self.config.test.num_requests)
            .await)
    }

    /// Last finalized statistics for a pair.
    pub fn statistics(&self, endpoint: &Endpoint, method: &str) -> Option<AggregatedStats> {
        self.results
            .get(&(endpoint.as_str().to_string(), method.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Every retained result, ordered by endpoint then method.
    pub fn all_statistics(&self) -> Vec<AggregatedStats> {
        let mut all: Vec<_> = self.results.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by(|a, b| (&a.endpoint, &a.method).cmp(&(&b.endpoint, &b.method)));
        all
    }

    pub fn resilience_snapshot(&self) -> ResilienceSnapshot {
        self.registry.snapshot()
    }
}

fn spawn_deadline(limit: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(
        async move {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!(
                        deadline_secs = limit.as_secs(),
                        "Batch deadline reached, cancelling"
                    );
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        }
        .in_current_span(),
    )
}

/// Everything a worker needs, shared by all workers of one batch.
struct Batch<D> {
    run_id: Uuid,
    endpoint: Endpoint,
    method: RpcMethod,
    dispatcher: Arc<D>,
    retry: RetryPolicy,
    timeout: Duration,
    rate: Result<Arc<RateLimiter>, RateLimitError>,
    breaker: Option<Arc<CircuitBreaker>>,
    slots: Arc<ConcurrencyLimiter>,
    hooks: Arc<Vec<Hook>>,
    cancel: CancellationToken,
    request_ids: Arc<AtomicU64>,
}

async fn worker<D: Dispatch>(
    batch: Arc<Batch<D>>,
    next: Arc<AtomicU64>,
    request_count: u64,
    tx: mpsc::Sender<RequestOutcome>,
) {
    while !batch.cancel.is_cancelled() {
        if next.fetch_add(1, Ordering::Relaxed) >= request_count {
            break;
        }
        let Some(outcome) = batch.run_request().await else {
            break;
        };
        if tx.send(outcome).await.is_err() {
            break;
        }
    }
}

impl<D: Dispatch> Batch<D> {
    /// One logical request; `None` when it was cancelled.
    async fn run_request(&self) -> Option<RequestOutcome> {
        let id = self.request_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let ctx = RequestContext {
            run_id: self.run_id,
            endpoint: &self.endpoint,
            method: &self.method,
            sequence: id,
        };
        notify_hooks(&self.hooks, &ctx, |hook| hook.on_request_start(&ctx));

        let outcome = match AssertUnwindSafe(self.execute(id)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(Cancelled)) => {
                notify_hooks(&self.hooks, &ctx, |hook| hook.on_request_cancelled(&ctx));
                return None;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(request_id = id, panic = %message, "Request task panicked");
                RequestOutcome::rejected(OutcomeError::Internal(message))
            }
        };

        notify_hooks(&self.hooks, &ctx, |hook| {
            if outcome.is_success() {
                hook.on_request_complete(&ctx, &outcome);
            } else {
                hook.on_request_error(&ctx, &outcome);
            }
        });
        Some(outcome)
    }

    async fn execute(&self, id: u64) -> Result<RequestOutcome, Cancelled> {
        let rate_permit = match &self.rate {
            Ok(limiter) => match limiter.acquire(1, &self.cancel).await {
                Ok(permit) => permit,
                Err(RateLimitError::Cancelled) => return Err(Cancelled),
                Err(e) => {
                    return Ok(RequestOutcome::rejected(OutcomeError::Internal(
                        e.to_string(),
                    )))
                }
            },
            Err(e) => return Ok(RequestOutcome::rejected(OutcomeError::Internal(e.to_string()))),
        };

        let circuit = match &self.breaker {
            Some(breaker) => match breaker.try_acquire() {
                Ok(permit) => Some(permit),
                Err(e) => {
                    tracing::debug!(request_id = id, error = %e, "Rejected by circuit breaker");
                    return Ok(RequestOutcome::rejected(OutcomeError::CircuitOpen(e.name)));
                }
            },
            None => None,
        };

        let _slot = self.slots.acquire(&self.cancel).await?;
        rate_permit.commit();

        let outcome = self
            .retry
            .execute(
                self.dispatcher.as_ref(),
                &self.endpoint,
                &self.method,
                self.timeout,
                id,
                &self.cancel,
            )
            .await?;

        if let Some(permit) = circuit {
            permit.record(&outcome);
        }
        if let Ok(limiter) = &self.rate {
            limiter.observe(&outcome);
        }
        Ok(outcome)
    }
}

/// Run `event` on every hook. A panicking hook is logged and skipped so the
/// worker keeps serving the batch.
fn notify_hooks(hooks: &[Hook], ctx: &RequestContext<'_>, event: impl Fn(&Hook)) {
    for hook in hooks {
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| event(hook))) {
            tracing::error!(
                request_id = ctx.sequence,
                panic = %panic_message(panic.as_ref()),
                "Request hook panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
