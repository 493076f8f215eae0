//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load fixtures → Metrics → Bind listener → Serve (+ task clock)
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → server drains, clock stops → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
