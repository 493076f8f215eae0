//! Asynchronous task simulation.
//!
//! # Data Flow
//! ```text
//! async-mock.json
//!     → fixtures.rs (pattern → method → canned value, immutable)
//!
//! proxied request/response pair
//!     → interceptor.rs (classify in priority order)
//!         → registry.rs (create / report / consume tasks)
//!         → counter.rs (select sequence items per call)
//!     → replacement body or "unmodified"
//!
//! clock.rs (periodic tick)
//!     → registry.rs (pending → completed)
//! ```
//!
//! # Design Decisions
//! - All mutable state lives in one `SimulationState` handed to each operation
//! - Fixtures are shared read-only, no locking
//! - Rewrites are fail-open: any parse failure leaves the backend response untouched

pub mod clock;
pub mod counter;
pub mod fixtures;
pub mod interceptor;
pub mod registry;
pub mod state;

pub use clock::TaskClock;
pub use counter::CallCounter;
pub use fixtures::{FixtureError, FixtureStore, FixtureValue};
pub use interceptor::{Interception, RequestContext, ResponseInterceptor, Rewrite, RewriteError};
pub use registry::{TaskId, TaskRegistry};
pub use state::{SharedSimulation, SimulationState};
