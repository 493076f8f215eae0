//! Periodic completion of pending tasks.
//!
//! # Responsibilities
//! - Tick on a fixed interval, first tick one interval after start
//! - Promote every pending task to completed on each tick
//! - Stop on shutdown

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::mock::state::{SharedSimulation, SimulationState};
use crate::observability::metrics;

pub struct TaskClock {
    simulation: SharedSimulation,
    interval: Duration,
}

impl TaskClock {
    pub fn new(simulation: SharedSimulation, interval: Duration) -> Self {
        Self {
            simulation,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Task clock starting");

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick(&mut self.simulation.lock());
                }
                _ = shutdown.recv() => {
                    tracing::info!("Task clock received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// One clock tick: every pending task becomes completed.
pub fn tick(state: &mut SimulationState) -> usize {
    let registry = &mut state.registry;

    if registry.pending_count() > 0 {
        tracing::debug!(
            count = registry.pending_count(),
            tasks = ?registry.pending_ids(),
            "Detected pending tasks"
        );
    }

    let moved = registry.advance_all_pending();

    if registry.completed_count() > 0 {
        tracing::debug!(
            count = registry.completed_count(),
            tasks = ?registry.completed_ids(),
            "Detected completed tasks"
        );
    }

    metrics::record_task_gauges(registry.pending_count(), registry.completed_count());
    moved
}
