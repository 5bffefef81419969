//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (counts > 0, rates > 0, timeouts > 0)
//! - Check that per-request timeouts fit inside the batch deadline
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TesterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{CircuitBreakerConfig, RateLimitConfig, TesterConfig};

/// A single semantic problem in a config.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("invalid endpoint URL '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("no test methods configured")]
    NoMethods,

    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("{field} must be a positive number")]
    NonPositive { field: String },

    #[error("request timeout ({timeout_ms} ms) must be smaller than the batch deadline ({deadline_secs} s)")]
    TimeoutExceedsDeadline { timeout_ms: u64, deadline_secs: u64 },

    #[error("{field}: {reason}")]
    Inconsistent { field: String, reason: String },
}

fn zero(field: impl Into<String>) -> ValidationError {
    ValidationError::Zero {
        field: field.into(),
    }
}

fn non_positive(field: impl Into<String>) -> ValidationError {
    ValidationError::NonPositive {
        field: field.into(),
    }
}

/// Check every semantic constraint, collecting all violations.
pub fn validate_config(config: &TesterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.endpoints.is_empty() {
        errors.push(ValidationError::NoEndpoints);
    }
    for raw in &config.endpoints {
        if let Err(e) = url::Url::parse(raw) {
            errors.push(ValidationError::InvalidEndpoint {
                url: raw.clone(),
                reason: e.to_string(),
            });
        }
    }
    if config.test_methods.is_empty() {
        errors.push(ValidationError::NoMethods);
    }

    let test = &config.test;
    if test.num_requests == 0 {
        errors.push(zero("test.num_requests"));
    }
    if test.concurrency == 0 {
        errors.push(zero("test.concurrency"));
    }
    if test.retry_attempts == 0 {
        errors.push(zero("test.retry_attempts"));
    }
    if test.timeout_ms == 0 {
        errors.push(zero("test.timeout_ms"));
    }
    if test.max_retry_delay_ms < test.retry_delay_ms {
        errors.push(ValidationError::Inconsistent {
            field: "test.max_retry_delay_ms".to_string(),
            reason: "must not be smaller than test.retry_delay_ms".to_string(),
        });
    }
    if let Some(deadline_secs) = test.batch_deadline_secs {
        if deadline_secs == 0 {
            errors.push(zero("test.batch_deadline_secs"));
        } else if test.timeout_ms >= deadline_secs.saturating_mul(1000) {
            errors.push(ValidationError::TimeoutExceedsDeadline {
                timeout_ms: test.timeout_ms,
                deadline_secs,
            });
        }
    }

    validate_rate_limit("rate_limit", &config.rate_limit, &mut errors);
    validate_circuit_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);

    for (url, overrides) in &config.overrides {
        if let Err(e) = url::Url::parse(url) {
            errors.push(ValidationError::InvalidEndpoint {
                url: url.clone(),
                reason: e.to_string(),
            });
        }
        if let Some(rate_limit) = &overrides.rate_limit {
            validate_rate_limit(&format!("overrides.{url}.rate_limit"), rate_limit, &mut errors);
        }
        if let Some(breaker) = &overrides.circuit_breaker {
            validate_circuit_breaker(
                &format!("overrides.{url}.circuit_breaker"),
                breaker,
                &mut errors,
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_rate_limit(prefix: &str, config: &RateLimitConfig, errors: &mut Vec<ValidationError>) {
    if !config.enabled {
        return;
    }
    if !(config.requests_per_second > 0.0 && config.requests_per_second.is_finite()) {
        errors.push(non_positive(format!("{prefix}.requests_per_second")));
    }
    if config.burst_size == Some(0) {
        errors.push(zero(format!("{prefix}.burst_size")));
    }
    if !(config.window_secs > 0.0 && config.window_secs.is_finite()) {
        errors.push(non_positive(format!("{prefix}.window_secs")));
    }

    let adaptive = &config.adaptive;
    if !(adaptive.min_rate > 0.0) {
        errors.push(non_positive(format!("{prefix}.adaptive.min_rate")));
    }
    if adaptive.max_rate < adaptive.min_rate {
        errors.push(ValidationError::Inconsistent {
            field: format!("{prefix}.adaptive.max_rate"),
            reason: "must not be smaller than min_rate".to_string(),
        });
    }
    if !(adaptive.increase_factor >= 1.0) {
        errors.push(ValidationError::Inconsistent {
            field: format!("{prefix}.adaptive.increase_factor"),
            reason: "must be at least 1.0".to_string(),
        });
    }
    if !(adaptive.decrease_factor > 0.0 && adaptive.decrease_factor <= 1.0) {
        errors.push(ValidationError::Inconsistent {
            field: format!("{prefix}.adaptive.decrease_factor"),
            reason: "must be in (0, 1]".to_string(),
        });
    }
    if adaptive.success_streak == 0 {
        errors.push(zero(format!("{prefix}.adaptive.success_streak")));
    }
    if adaptive.error_streak == 0 {
        errors.push(zero(format!("{prefix}.adaptive.error_streak")));
    }
}

fn validate_circuit_breaker(
    prefix: &str,
    config: &CircuitBreakerConfig,
    errors: &mut Vec<ValidationError>,
) {
    if !config.enabled {
        return;
    }
    if config.failure_threshold == 0 {
        errors.push(zero(format!("{prefix}.failure_threshold")));
    }
    if config.success_threshold == 0 {
        errors.push(zero(format!("{prefix}.success_threshold")));
    }
    if config.half_open_max_calls == 0 {
        errors.push(zero(format!("{prefix}.half_open_max_calls")));
    }
    if config.window_size == 0 {
        errors.push(zero(format!("{prefix}.window_size")));
    }
    if config.min_calls > config.window_size {
        errors.push(ValidationError::Inconsistent {
            field: format!("{prefix}.min_calls"),
            reason: "must not exceed window_size".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::EndpointOverride;

    fn valid() -> TesterConfig {
        TesterConfig {
            endpoints: vec!["http://localhost:8545".to_string()],
            ..TesterConfig::default()
        }
    }

    #[test]
    fn test_default_with_endpoint_is_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn test_reports_all_errors() {
        let mut config = valid();
        config.endpoints.push("::not a url::".to_string());
        config.test_methods.clear();
        config.test.num_requests = 0;
        config.test.concurrency = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::NoMethods));
        assert!(errors.contains(&zero("test.concurrency")));
    }

    #[test]
    fn test_empty_endpoints() {
        let errors = validate_config(&TesterConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoEndpoints]);
    }

    #[test]
    fn test_timeout_must_fit_deadline() {
        let mut config = valid();
        config.test.timeout_ms = 5000;
        config.test.batch_deadline_secs = Some(5);
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::TimeoutExceedsDeadline { .. }));

        config.test.batch_deadline_secs = Some(6);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rate_limit_checked_only_when_enabled() {
        let mut config = valid();
        config.rate_limit.requests_per_second = 0.0;
        assert!(validate_config(&config).is_ok());

        config.rate_limit.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![non_positive("rate_limit.requests_per_second")]);
    }

    #[test]
    fn test_override_is_validated() {
        let mut config = valid();
        let mut breaker = CircuitBreakerConfig::default();
        breaker.failure_threshold = 0;
        config.overrides.insert(
            "http://localhost:8545".to_string(),
            EndpointOverride {
                rate_limit: None,
                circuit_breaker: Some(breaker),
            },
        );
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![zero("overrides.http://localhost:8545.circuit_breaker.failure_threshold")]
        );
    }
}
