//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{HeaderName, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use task_mock_proxy::config::ProxyConfig;
use task_mock_proxy::lifecycle::Shutdown;
use task_mock_proxy::mock::{FixtureStore, SharedSimulation};
use task_mock_proxy::HttpServer;

/// Backend body the task endpoints answer with.
pub const BACKEND_OK: &str = r#"{"result": null, "message": ""}"#;

/// Serve `router` on an ephemeral port.
pub async fn start_backend(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Backend that answers every request with the same response.
pub async fn start_fixed_backend(
    status: u16,
    content_type: &'static str,
    body: &'static str,
) -> SocketAddr {
    let status = StatusCode::from_u16(status).unwrap();
    start_backend(Router::new().fallback(move || async move {
        (status, [(CONTENT_TYPE, content_type)], body)
    }))
    .await
}

/// Backend that describes the request it received as JSON.
pub async fn start_echo_backend() -> SocketAddr {
    start_backend(Router::new().fallback(|request: Request<Body>| async move {
        let (parts, body) = request.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .unwrap_or_default();
        let header = |name: HeaderName| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Json(json!({
            "method": parts.method.as_str(),
            "uri": parts.uri.to_string(),
            "content_type": header(CONTENT_TYPE),
            "content_length": header(CONTENT_LENGTH),
            "body": String::from_utf8_lossy(&bytes),
        }))
    }))
    .await
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Proxy config pointing at `backend` with the given tick interval.
pub fn proxy_config(backend: SocketAddr, tick: Duration) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.backend.url = format!("http://{backend}");
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.mock.tick_interval_ms = tick.as_millis() as u64;
    config
}

/// A running proxy. Shuts down when dropped.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub simulation: SharedSimulation,
    shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(config: ProxyConfig, fixtures: Value) -> TestProxy {
    let fixtures = FixtureStore::from_json(fixtures).unwrap();
    let server = HttpServer::new(config, fixtures).unwrap();
    let simulation = server.simulation();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, receiver).await;
    });

    TestProxy {
        addr,
        simulation,
        shutdown,
    }
}

/// HTTP client that ignores proxy environment variables.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
