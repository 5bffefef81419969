//! Shared utilities for integration and load testing.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rpc_tester::config::TesterConfig;

/// Start a programmable JSON-RPC backend on an ephemeral port.
///
/// `f` receives the parsed request body (or `Value::Null` if it was not
/// JSON) and returns the HTTP status and raw body to send back.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(request).await;
                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Backend answering every call with `{"result": result}` and the caller's id.
#[allow(dead_code)]
pub async fn start_result_backend(result: Value) -> SocketAddr {
    start_programmable_backend(move |request| {
        let result = result.clone();
        async move { (200, success_body(&request, result)) }
    })
    .await
}

#[allow(dead_code)]
pub fn success_body(request: &Value, result: Value) -> String {
    serde_json::json!({"jsonrpc": "2.0", "id": request["id"], "result": result}).to_string()
}

#[allow(dead_code)]
pub fn error_body(request: &Value, code: i64, message: &str) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "error": {"code": code, "message": message},
    })
    .to_string()
}

/// Test config pointing at `addr` with fast retries.
#[allow(dead_code)]
pub fn config_for(addr: SocketAddr) -> TesterConfig {
    let mut config = TesterConfig {
        endpoints: vec![format!("http://{addr}")],
        test_methods: vec!["eth_blockNumber".to_string()],
        ..TesterConfig::default()
    };
    config.test.timeout_ms = 2000;
    config.test.retry_delay_ms = 10;
    config.test.max_retry_delay_ms = 100;
    config
}

async fn read_request(socket: &mut TcpStream) -> Option<Value> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = &buf[header_end..buf.len().min(header_end + content_length)];
    Some(serde_json::from_slice(body).unwrap_or(Value::Null))
}
