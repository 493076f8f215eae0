//! In-memory ledger of synthetic tasks.
//!
//! # State Transitions
//! ```text
//! create_task()            advance_all_pending()          consume_completed()
//!      ──────▶ Pending ──────────────────────▶ Completed ──────────────────▶ (gone)
//! ```
//!
//! A completed outcome is handed out at most once.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

/// Identifier of a synthetic task.
pub type TaskId = u64;

/// Ids start well above anything the real backend hands out.
pub const FIRST_TASK_ID: TaskId = 100_000;

/// Pending and completed tasks plus the outcome each one resolves to.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    next_id: TaskId,
    pending: BTreeSet<TaskId>,
    completed: BTreeSet<TaskId>,
    outcomes: HashMap<TaskId, Value>,
}

impl TaskRegistry {
    pub fn new(first_id: TaskId) -> Self {
        Self {
            next_id: first_id,
            pending: BTreeSet::new(),
            completed: BTreeSet::new(),
            outcomes: HashMap::new(),
        }
    }

    /// Id the next `create_task` will return.
    pub fn next_id(&self) -> TaskId {
        self.next_id
    }

    /// Allocate a pending task that will resolve to `outcome`.
    pub fn create_task(&mut self, outcome: Value) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id);
        self.outcomes.insert(id, outcome);
        id
    }

    /// Move every pending task to completed. Returns how many moved.
    pub fn advance_all_pending(&mut self) -> usize {
        let moved = self.pending.len();
        self.completed.append(&mut self.pending);
        moved
    }

    /// Outcome of a completed task, without consuming it.
    pub fn completed_outcome(&self, id: TaskId) -> Option<&Value> {
        if self.completed.contains(&id) {
            self.outcomes.get(&id)
        } else {
            None
        }
    }

    /// Remove a completed task and return its outcome.
    ///
    /// Returns `None` for pending and unknown ids alike; use [`Self::is_pending`]
    /// to tell them apart.
    pub fn consume_completed(&mut self, id: TaskId) -> Option<Value> {
        if !self.completed.remove(&id) {
            return None;
        }
        Some(self.outcomes.remove(&id).unwrap_or(Value::Null))
    }

    pub fn is_pending(&self, id: TaskId) -> bool {
        self.pending.contains(&id)
    }

    pub fn is_completed(&self, id: TaskId) -> bool {
        self.completed.contains(&id)
    }

    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.pending.iter().copied().collect()
    }

    pub fn completed_ids(&self) -> Vec<TaskId> {
        self.completed.iter().copied().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(FIRST_TASK_ID)
    }
}
