//! Per-operation invocation counts
//!
//! Counts only ever grow during the process lifetime; [`UsageTracker::clear`]
//! is the single administrative reset.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Invocation counter keyed by operation name
#[derive(Debug, Default)]
pub struct UsageTracker {
    counts: DashMap<String, AtomicU64>,
}

impl UsageTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the count for `name`, returning the new value
    pub fn record(&self, name: &str) -> u64 {
        if let Some(counter) = self.counts.get(name) {
            return counter.fetch_add(1, Ordering::Relaxed) + 1;
        }
        self.counts
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    /// Current count for `name` (0 when never invoked)
    pub fn count(&self, name: &str) -> u64 {
        self.counts
            .get(name)
            .map_or(0, |entry| entry.load(Ordering::Relaxed))
    }

    /// Reset every count
    pub fn clear(&self) {
        self.counts.clear();
    }

    /// The `n` most-used operations, highest first (ties by name)
    pub fn top(&self, n: usize) -> Vec<UsageEntry> {
        let mut entries: Vec<UsageEntry> = self
            .counts
            .iter()
            .map(|entry| UsageEntry {
                name: entry.key().clone(),
                count: entry.value().load(Ordering::Relaxed),
            })
            .filter(|e| e.count > 0)
            .collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        entries.truncate(n);
        entries
    }
}

/// One row of usage output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    /// Operation name
    pub name: String,
    /// Invocation count
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn unknown_name_counts_zero() {
        assert_eq!(UsageTracker::new().count("nope"), 0);
    }

    #[test]
    fn record_increments_and_returns_new_value() {
        let usage = UsageTracker::new();
        assert_eq!(usage.record("grep_code"), 1);
        assert_eq!(usage.record("grep_code"), 2);
        assert_eq!(usage.count("grep_code"), 2);
    }

    #[test]
    fn clear_resets_counts() {
        let usage = UsageTracker::new();
        usage.record("a");
        usage.clear();
        assert_eq!(usage.count("a"), 0);
        assert!(usage.top(5).is_empty());
    }

    #[test]
    fn top_orders_by_count_then_name() {
        let usage = UsageTracker::new();
        for _ in 0..3 {
            usage.record("b");
        }
        usage.record("a");
        usage.record("c");

        let names: Vec<String> = usage.top(2).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let usage = Arc::new(UsageTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let usage = Arc::clone(&usage);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        usage.record("hot");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(usage.count("hot"), 8000);
    }
}
