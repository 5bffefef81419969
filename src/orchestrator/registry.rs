//! Per-endpoint resilience state.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::{CircuitBreakerConfig, TesterConfig};
use crate::dispatch::Endpoint;
use crate::limits::{RateLimitError, RateLimiter, RateLimiterManager, RateLimiterSnapshot};
use crate::resilience::{CircuitBreaker, CircuitSnapshot};

/// Breaker and limiter state for every endpoint, created on first use and
/// kept for the registry's lifetime.
#[derive(Debug)]
pub struct EndpointRegistry {
    breaker_default: CircuitBreakerConfig,
    breaker_overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    limiters: RateLimiterManager,
}

/// Serializable view of all endpoint state.
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceSnapshot {
    pub circuit_breakers: Vec<CircuitSnapshot>,
    pub rate_limiters: Vec<RateLimiterSnapshot>,
}

impl EndpointRegistry {
    pub fn from_config(config: &TesterConfig) -> Self {
        let mut breaker_overrides = HashMap::new();
        let mut rate_overrides = HashMap::new();

        for (raw, overrides) in &config.overrides {
            let key = match Endpoint::parse(raw) {
                Ok(endpoint) => endpoint.as_str().to_string(),
                Err(e) => {
                    tracing::warn!(
                        endpoint = %raw,
                        error = %e,
                        "Ignoring override for invalid URL"
                    );
                    continue;
                }
            };
            if let Some(breaker) = &overrides.circuit_breaker {
                breaker_overrides.insert(key.clone(), breaker.clone());
            }
            if let Some(rate_limit) = &overrides.rate_limit {
                rate_overrides.insert(key, rate_limit.clone());
            }
        }

        Self {
            breaker_default: config.circuit_breaker.clone(),
            breaker_overrides,
            breakers: DashMap::new(),
            limiters: RateLimiterManager::new(config.rate_limit.clone(), rate_overrides),
        }
    }

    /// The endpoint's breaker, or `None` when circuit breaking is disabled for it.
    pub fn breaker_for(&self, endpoint: &Endpoint) -> Option<Arc<CircuitBreaker>> {
        let key = endpoint.as_str();
        let config = self.breaker_overrides.get(key).unwrap_or(&self.breaker_default);
        if !config.enabled {
            return None;
        }
        if let Some(breaker) = self.breakers.get(key) {
            return Some(Arc::clone(breaker.value()));
        }
        let breaker = Arc::new(CircuitBreaker::new(key, config.clone()));
        let entry = self.breakers.entry(key.to_string()).or_insert(breaker);
        Some(Arc::clone(entry.value()))
    }

    pub fn limiter_for(&self, endpoint: &Endpoint) -> Result<Arc<RateLimiter>, RateLimitError> {
        self.limiters.limiter_for(endpoint)
    }

    /// Reset every breaker to Closed.
    pub fn reset_breakers(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        let mut circuit_breakers: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        circuit_breakers.sort_by(|a, b| a.name.cmp(&b.name));
        ResilienceSnapshot {
            circuit_breakers,
            rate_limiters: self.limiters.snapshot(),
        }
    }
}
