//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use service_registry::config::RegistryConfig;
use service_registry::health::HealthMonitor;
use service_registry::http::HttpServer;
use service_registry::lifecycle::Shutdown;
use service_registry::registry::InstanceStore;

pub const SECRET: &str = "integration-secret";

/// One canned answer of a mock backend.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl MockResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    /// A health payload with the given status string and load.
    pub fn health(status: &str, load: f64) -> Self {
        Self::json(
            200,
            serde_json::json!({ "status": status, "load_percentage": load }),
        )
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Counters kept by a programmable backend.
#[derive(Debug, Default)]
pub struct BackendStats {
    pub requests: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl BackendStats {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, Arc<BackendStats>)
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);
    let stats = Arc::new(BackendStats::default());
    let backend_stats = Arc::clone(&stats);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let f = Arc::clone(&f);
            let stats = Arc::clone(&backend_stats);
            tokio::spawn(serve_one(socket, f, stats));
        }
    });

    (addr, stats)
}

async fn serve_one<F, Fut>(mut socket: TcpStream, f: Arc<F>, stats: Arc<BackendStats>)
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = MockResponse>,
{
    if !read_request_head(&mut socket).await {
        return;
    }

    let call = stats.requests.fetch_add(1, Ordering::SeqCst);
    let current = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    stats.max_in_flight.fetch_max(current, Ordering::SeqCst);

    let response = f(call).await;
    tokio::time::sleep(response.delay).await;
    stats.in_flight.fetch_sub(1, Ordering::SeqCst);

    let raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        reason(response.status),
        response.body.len(),
        response.body
    );
    let _ = socket.write_all(raw.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn read_request_head(socket: &mut TcpStream) -> bool {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    return true;
                }
            }
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// A backend that always gives the same answer.
pub async fn start_fixed_backend(response: MockResponse) -> (SocketAddr, Arc<BackendStats>) {
    start_programmable_backend(move |_| {
        let response = response.clone();
        async move { response }
    })
    .await
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Configuration tuned for fast tests.
pub fn test_config() -> RegistryConfig {
    let mut config = RegistryConfig::default();
    config.server.bind_address = "127.0.0.1:0".to_string();
    config.server.secret = SECRET.to_string();
    config.monitoring.interval_secs = 1;
    config.monitoring.timeout_ms = 1000;
    config.retries.max_attempts = 3;
    config.retries.delay_ms = 10;
    config
}

/// A registry served over HTTP on an ephemeral port.
pub struct TestRegistry {
    pub url: String,
    pub store: Arc<InstanceStore>,
    pub monitor: Arc<HealthMonitor>,
    shutdown: Shutdown,
}

impl TestRegistry {
    pub async fn start(config: RegistryConfig) -> Self {
        Self::start_with_metrics(config, None).await
    }

    pub async fn start_with_metrics(
        config: RegistryConfig,
        metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
    ) -> Self {
        let store = Arc::new(InstanceStore::new());
        let monitor = Arc::new(HealthMonitor::new(Arc::clone(&store), &config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let server = HttpServer::new(&config, Arc::clone(&store), Arc::clone(&monitor), metrics);
        tokio::spawn(server.run(listener, shutdown.subscribe()));

        Self {
            url: format!("http://{}", addr),
            store,
            monitor,
            shutdown,
        }
    }

    pub fn api(&self, path: &str) -> String {
        format!("{}/v1/discovery{}", self.url, path)
    }

    pub async fn stop(&self) {
        self.monitor.stop().await;
        self.shutdown.trigger();
    }
}
