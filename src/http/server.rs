//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the health endpoint and the catch-all proxy handler
//! - Wire up middleware (tracing, request ID, timeout, CORS)
//! - Buffer and re-encode request bodies before forwarding
//! - Forward requests to the backend and run the response interceptor
//! - Relay WebSocket upgrades
//! - Drive the task clock alongside the server

use axum::{
    body::Body,
    extract::{FromRequestParts, State, WebSocketUpgrade},
    http::{
        header::{HeaderValue, HOST},
        uri::{Authority, Scheme},
        Request, StatusCode, Uri,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::http::cors::permissive_cors;
use crate::http::health::{health, HEALTH_PATH};
use crate::http::request::{self, MakeRequestUuid, X_REQUEST_ID};
use crate::http::{response, websocket};
use crate::mock::{
    FixtureStore, RequestContext, ResponseInterceptor, SharedSimulation, SimulationState, TaskClock,
};
use crate::observability::metrics;

/// Error type for server construction.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid backend url `{url}`: {reason}")]
    InvalidBackend { url: String, reason: String },
}

/// Where proxied requests go.
#[derive(Debug, Clone)]
pub struct BackendTarget {
    scheme: Scheme,
    authority: Authority,
    /// Path prefix of the backend URL, without a trailing slash.
    base_path: String,
}

impl BackendTarget {
    pub fn parse(url: &str) -> Result<Self, ServerError> {
        let invalid = |reason: String| ServerError::InvalidBackend {
            url: url.to_string(),
            reason,
        };

        let uri: Uri = url.parse().map_err(|e| invalid(format!("{e}")))?;
        let scheme = uri
            .scheme()
            .cloned()
            .ok_or_else(|| invalid("missing scheme".to_string()))?;
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| invalid("missing host".to_string()))?;

        Ok(Self {
            scheme,
            authority,
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    /// Backend URI for a client path and query.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, axum::http::Error> {
        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(format!("{}{}", self.base_path, path_and_query))
            .build()
    }

    /// Backend WebSocket URL for a client path and query.
    pub fn websocket_url(&self, path_and_query: &str) -> String {
        format!("ws://{}{}{}", self.authority, self.base_path, path_and_query)
    }

    /// `Host` header value naming the backend.
    pub fn host_header(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(self.authority.as_str()).ok()
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<BackendTarget>,
    pub client: Client<HttpConnector, Body>,
    pub interceptor: ResponseInterceptor,
    pub body_limit: usize,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    simulation: SharedSimulation,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration and fixtures.
    pub fn new(config: ProxyConfig, fixtures: FixtureStore) -> Result<Self, ServerError> {
        let backend = Arc::new(BackendTarget::parse(&config.backend.url)?);

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let simulation = SharedSimulation::new(SimulationState::new(config.mock.first_task_id));
        let interceptor = ResponseInterceptor::new(Arc::new(fixtures), simulation.clone());

        let state = AppState {
            backend,
            client,
            interceptor,
            body_limit: config.security.max_body_size,
        };

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            config,
            simulation,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route(HEALTH_PATH, get(health).fallback(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(middleware::from_fn(permissive_cors))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for driving the server without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Handle to the task simulation state.
    pub fn simulation(&self) -> SharedSimulation {
        self.simulation.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server and the task clock until shutdown is signalled.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backend = %self.config.backend.url,
            "HTTP server starting"
        );

        let clock = TaskClock::new(
            self.simulation.clone(),
            Duration::from_millis(self.config.mock.tick_interval_ms),
        );
        tokio::spawn(clock.run(shutdown.resubscribe()));

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Re-encodes the body, forwards to the backend, and intercepts the response.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request::request_id(request.headers());
    let method = request.method().clone();
    let url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        url = %url,
        "Proxying request"
    );

    if websocket::is_upgrade_request(request.headers()) {
        return upgrade_websocket(&state, request, &url).await;
    }

    // 1. Buffer and re-encode the body
    let (mut parts, body) = request.into_parts();
    let raw = match axum::body::to_bytes(body, state.body_limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Failed to read request body");
            metrics::record_request(method.as_str(), 413, "none", start_time);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large or unreadable")
                .into_response();
        }
    };
    let parsed = request::parse_body(&parts.headers, &raw);
    let forward_body = request::rewrite_body(&mut parts.headers, &parsed, raw);

    // 2. Forward
    let uri = match state.backend.uri_for(&url) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, url = %url, error = %e, "Failed to build backend URI");
            metrics::record_request(method.as_str(), 502, "none", start_time);
            return (StatusCode::BAD_GATEWAY, "Invalid upstream request").into_response();
        }
    };

    let mut upstream = Request::new(Body::from(forward_body));
    *upstream.method_mut() = method.clone();
    *upstream.uri_mut() = uri;
    *upstream.headers_mut() = parts.headers.clone();
    if let Some(host) = state.backend.host_header() {
        upstream.headers_mut().insert(HOST, host);
    }

    let backend_response = match state.client.request(upstream).await {
        Ok(response) => response.map(Body::new),
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            metrics::record_request(method.as_str(), 502, "none", start_time);
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    // 3. Intercept
    let ctx = RequestContext::new(method.clone(), url, parts.headers, parsed);
    let (response, plan) =
        response::intercept(&state.interceptor, &ctx, backend_response, state.body_limit).await;

    metrics::record_request(
        method.as_str(),
        response.status().as_u16(),
        plan.label(),
        start_time,
    );
    response
}

async fn upgrade_websocket(state: &AppState, request: Request<Body>, url: &str) -> Response {
    let (mut parts, _body) = request.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, state).await {
        Ok(ws) => websocket::forward(ws, state.backend.websocket_url(url), &parts.headers).await,
        Err(rejection) => rejection.into_response(),
    }
}
