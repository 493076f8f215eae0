//! task-mock-proxy
//!
//! ```text
//!     Client ──▶ http server ──▶ request body re-encode ──▶ backend
//!                                                             │
//!     Client ◀── CORS ◀── response interceptor ◀──────────────┘
//!                              │
//!                     fixtures · call counter · task registry ◀── task clock
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use task_mock_proxy::config::load_config;
use task_mock_proxy::lifecycle::startup;
use task_mock_proxy::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "task-mock-proxy", version, about = "Reverse proxy with async task mocks")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "task-mock-proxy starting");

    if let Err(e) = startup::run(config).await {
        tracing::error!(error = %e, "Proxy exited with error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
