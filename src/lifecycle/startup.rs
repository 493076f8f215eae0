//! Startup orchestration.
//!
//! # Responsibilities
//! - Load the fixture document
//! - Install the metrics exporter when enabled
//! - Bind the listener and serve until a shutdown signal arrives
//!
//! # Design Decisions
//! - Fail fast: a bad backend URL or an unbindable address is fatal
//! - A missing or broken fixture document is not; the proxy runs without mocks
//! - Listeners start last (traffic only when ready)

use std::path::Path;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::Shutdown;
use crate::mock::FixtureStore;
use crate::observability::metrics;

/// Error type for startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bring the proxy up and run it until SIGINT/SIGTERM.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    let fixtures = FixtureStore::load(Path::new(&config.mock.fixture_path));
    tracing::info!(
        path = %config.mock.fixture_path,
        patterns = fixtures.len(),
        "Fixtures loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let address = config.listener.bind_address.clone();
    let server = HttpServer::new(config, fixtures)?;

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        address = %local_addr,
        backend = %server.config().backend.url,
        "Proxy server is running"
    );

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(shutdown.trigger_on_signal());

    server.run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
