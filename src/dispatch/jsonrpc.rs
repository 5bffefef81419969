//! JSON-RPC 2.0 wire format and response classification.

use serde::Serialize;
use serde_json::Value;

use crate::dispatch::types::{OutcomeError, RequestOutcome};

/// Error code many Ethereum nodes use for "limit exceeded".
pub const LIMIT_EXCEEDED_CODE: i64 = -32005;

/// Maximum number of body bytes quoted in an HTTP error message.
const ERROR_BODY_PREVIEW: usize = 100;

/// Outgoing request body.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// Classify a completed HTTP exchange into an outcome.
pub fn classify_response(status: u16, body: &[u8], latency_ms: f64) -> RequestOutcome {
    if status != 200 {
        let text = String::from_utf8_lossy(body);
        let preview: String = text.chars().take(ERROR_BODY_PREVIEW).collect();
        let error = if status == 429 {
            OutcomeError::RateLimited {
                status: Some(status),
                message: preview,
            }
        } else {
            OutcomeError::Http {
                status,
                body: preview,
            }
        };
        return RequestOutcome::failure(error, Some(latency_ms), Some(status));
    }

    let parsed: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            return RequestOutcome::failure(
                OutcomeError::Protocol(e.to_string()),
                Some(latency_ms),
                Some(status),
            )
        }
    };

    let Some(object) = parsed.as_object() else {
        return RequestOutcome::failure(
            OutcomeError::Protocol("response is not a JSON object".to_string()),
            Some(latency_ms),
            Some(status),
        );
    };

    match object.get("error") {
        Some(error) if !error.is_null() => {
            RequestOutcome::failure(classify_rpc_error(error), Some(latency_ms), Some(status))
        }
        _ => match object.get("result") {
            Some(result) => RequestOutcome::success(latency_ms, status, result.clone()),
            None => RequestOutcome::failure(
                OutcomeError::Protocol("response has neither result nor error".to_string()),
                Some(latency_ms),
                Some(status),
            ),
        },
    }
}

fn classify_rpc_error(error: &Value) -> OutcomeError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = match error.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => error.to_string(),
    };

    if is_throttling(code, &message) {
        OutcomeError::RateLimited {
            status: None,
            message,
        }
    } else {
        OutcomeError::Rpc { code, message }
    }
}

fn is_throttling(code: i64, message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    code == LIMIT_EXCEEDED_CODE
        || lowered.contains("rate limit")
        || lowered.contains("too many requests")
}
