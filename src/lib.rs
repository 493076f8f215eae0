//! Mock-injecting reverse proxy.
//!
//! Forwards every request to a single backend and rewrites selected
//! responses from a fixture document, simulating asynchronous tasks that
//! complete on a timer.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod mock;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
