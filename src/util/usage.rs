//! Usage tracking across tasks.

use std::sync::{Arc, RwLock};

use crate::types::usage::Usage;

/// Tracks cumulative token usage across every task a coordinator runs.
#[derive(Clone)]
pub struct UsageTracker {
    inner: Arc<RwLock<UsageTrackerInner>>,
}

#[derive(Default)]
struct UsageTrackerInner {
    total_usage: Usage,
    task_count: u64,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(UsageTrackerInner::default())),
        }
    }

    /// Record usage from a finished task.
    pub fn record(&self, usage: &Usage) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.total_usage.merge(usage);
        inner.task_count += 1;
    }

    pub fn total_usage(&self) -> Usage {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .total_usage
    }

    /// Number of tasks recorded.
    pub fn task_count(&self) -> u64 {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).task_count
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = UsageTrackerInner::default();
    }
}
