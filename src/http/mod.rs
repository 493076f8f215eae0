//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, proxy handler)
//!     → request.rs (request ID, parse & re-encode body)
//!     → forward to backend (hyper client)
//!     → response.rs (interceptor, rewritten or streamed body)
//!     → cors.rs (permissive headers when missing)
//!     → Send to client
//! ```

pub mod cors;
pub mod health;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{BackendTarget, HttpServer, ServerError};
