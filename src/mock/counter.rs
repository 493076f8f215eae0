//! Per-route call counting for sequence fixtures.

use std::collections::HashMap;

/// Counts intercepted calls per (URL, method).
///
/// Counts start at zero on first observation and are never reset.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    counts: HashMap<String, HashMap<String, usize>>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call and return the updated count.
    pub fn increment(&mut self, url: &str, method: &str) -> usize {
        let count = self
            .counts
            .entry(url.to_string())
            .or_default()
            .entry(method.to_string())
            .or_insert(0);
        *count += 1;
        *count
    }

    /// Calls recorded so far.
    pub fn get(&self, url: &str, method: &str) -> usize {
        self.counts
            .get(url)
            .and_then(|methods| methods.get(method))
            .copied()
            .unwrap_or(0)
    }
}
