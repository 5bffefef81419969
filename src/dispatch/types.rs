//! Endpoint, method and outcome types shared by every subsystem.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// A JSON-RPC endpoint under test, identified by its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Parse an endpoint URL.
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: Url::parse(raw)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Normalized URL string, used as the key for per-endpoint state.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl From<Url> for Endpoint {
    fn from(url: Url) -> Self {
        Self { url }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// An RPC method name plus its parameter template.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMethod {
    name: String,
    params: Value,
}

impl RpcMethod {
    /// A method called with an empty parameter list.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_params(name, Vec::new())
    }

    pub fn with_params(name: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            params: Value::Array(params),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Value {
        &self.params
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Coarse classification of a failed request, used for retry decisions and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, DNS/TLS failure, or a non-200 HTTP status.
    Transport,
    /// The per-request timeout elapsed.
    Timeout,
    /// The body was not a well-formed JSON-RPC response.
    Protocol,
    /// The endpoint answered with a JSON-RPC `error` object.
    Application,
    /// Rejected by the circuit breaker before any network call.
    CircuitOpen,
    /// The endpoint signalled throttling (HTTP 429 or a rate-limit RPC error).
    RateLimited,
    /// Unexpected failure inside the task running the request.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::Application => "application",
            Self::CircuitOpen => "circuit_open",
            Self::RateLimited => "rate_limited",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error detail carried by a failed [`RequestOutcome`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OutcomeError {
    /// Non-200 HTTP response.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure (refused, DNS, TLS, broken body stream).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request exceeded its timeout.
    #[error("Request timeout after {0} ms")]
    Timeout(u64),

    /// Malformed or non-JSON response body.
    #[error("Invalid JSON-RPC response: {0}")]
    Protocol(String),

    /// Well-formed JSON-RPC error response.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Throttling signalled by the endpoint.
    #[error("Rate limited: {message}")]
    RateLimited { status: Option<u16>, message: String },

    /// Fast-fail from the circuit breaker.
    #[error("Circuit breaker '{0}' rejected the call")]
    CircuitOpen(String),

    /// Task-level failure (panic or resource acquisition error).
    #[error("Task failure: {0}")]
    Internal(String),
}

impl OutcomeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http { .. } | Self::Connection(_) => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Rpc { .. } => ErrorKind::Application,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// What the retry loop should do with an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    /// Timeouts, connection failures and HTTP 5xx.
    Retryable,
    /// Everything else: retrying cannot change a deterministic answer.
    Terminal,
}

/// Result of one logical request, after all retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    latency_ms: Option<f64>,
    error: Option<OutcomeError>,
    status: Option<u16>,
    attempt: u32,
    result: Option<Value>,
}

impl RequestOutcome {
    /// A successful call that returned `result`.
    pub fn success(latency_ms: f64, status: u16, result: Value) -> Self {
        Self {
            latency_ms: Some(latency_ms.max(0.0)),
            error: None,
            status: Some(status),
            attempt: 1,
            result: Some(result),
        }
    }

    /// A call that reached (or tried to reach) the network and failed.
    pub fn failure(error: OutcomeError, latency_ms: Option<f64>, status: Option<u16>) -> Self {
        Self {
            latency_ms: latency_ms.map(|ms| ms.max(0.0)),
            error: Some(error),
            status,
            attempt: 1,
            result: None,
        }
    }

    /// A request that failed before any dispatch took place.
    pub fn rejected(error: OutcomeError) -> Self {
        Self {
            latency_ms: None,
            error: Some(error),
            status: None,
            attempt: 0,
            result: None,
        }
    }

    pub(crate) fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Latency of the final attempt; `None` when nothing was dispatched.
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }

    pub fn error(&self) -> Option<&OutcomeError> {
        self.error.as_ref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(OutcomeError::kind)
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Number of tries consumed by this request.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn disposition(&self) -> Disposition {
        match &self.error {
            None => Disposition::Success,
            Some(OutcomeError::Timeout(_)) | Some(OutcomeError::Connection(_)) => {
                Disposition::Retryable
            }
            Some(OutcomeError::Http { status, .. }) if *status >= 500 => Disposition::Retryable,
            Some(_) => Disposition::Terminal,
        }
    }

    /// True when the endpoint itself misbehaved.
    ///
    /// 4xx answers, RPC errors and throttling prove the endpoint is up and
    /// do not count against it.
    pub fn is_endpoint_fault(&self) -> bool {
        match &self.error {
            Some(OutcomeError::Http { status, .. }) => *status >= 500,
            Some(OutcomeError::Connection(_))
            | Some(OutcomeError::Timeout(_))
            | Some(OutcomeError::Protocol(_)) => true,
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.error, Some(OutcomeError::RateLimited { .. }))
    }
}
