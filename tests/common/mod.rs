//! Shared utilities for integration tests.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use upstream_guard::config::{CircuitBreakerConfig, GuardConfig, RetryConfig, UpstreamConfig};

/// Start a programmable mock upstream on an ephemeral port.
///
/// `f` is called once per request and returns the status and body to send.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
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
                        // Drain the request head; bodies in these tests are small.
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
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
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A config with one upstream at `addr` and millisecond backoff.
pub fn config_for(name: &str, addr: SocketAddr, max_retries: u32, failure_threshold: u32) -> GuardConfig {
    let mut config = GuardConfig::default();
    config.retry = RetryConfig {
        max_retries,
        backoff_unit_ms: 1,
        max_backoff_ms: 20,
        ..RetryConfig::default()
    };
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold,
        reset_timeout_ms: 200,
        ..CircuitBreakerConfig::default()
    };
    config.upstreams.push(UpstreamConfig {
        name: name.to_string(),
        base_url: format!("http://{}/v1/", addr),
        request_timeout_ms: 2000,
        retry: None,
        circuit_breaker: None,
    });
    config
}
