//! Process-wide simulation state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::mock::counter::CallCounter;
use crate::mock::registry::{TaskId, TaskRegistry};

/// Everything the simulation mutates: the task ledger and the call counts.
#[derive(Debug, Clone, Default)]
pub struct SimulationState {
    pub registry: TaskRegistry,
    pub counter: CallCounter,
}

impl SimulationState {
    pub fn new(first_task_id: TaskId) -> Self {
        Self {
            registry: TaskRegistry::new(first_task_id),
            counter: CallCounter::new(),
        }
    }
}

/// Handle to the simulation state shared by request handlers and the clock.
///
/// The lock is only held for synchronous, in-memory steps.
#[derive(Debug, Clone, Default)]
pub struct SharedSimulation {
    inner: Arc<Mutex<SimulationState>>,
}

impl SharedSimulation {
    pub fn new(state: SimulationState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Lock the state, recovering from poisoning.
    pub fn lock(&self) -> MutexGuard<'_, SimulationState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
