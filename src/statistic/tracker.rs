//! Running task tracker

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Count of live session and relay tasks
#[derive(Debug, Default)]
pub struct ActiveTasks {
    count: AtomicUsize,
}

impl ActiveTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running task; it is counted until the guard drops
    pub fn track(self: &Arc<Self>) -> TaskGuard {
        self.count.fetch_add(1, Ordering::Relaxed);
        TaskGuard {
            tasks: Arc::clone(self),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

/// Decrements [`ActiveTasks`] on drop
#[derive(Debug)]
pub struct TaskGuard {
    tasks: Arc<ActiveTasks>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.tasks.count.fetch_sub(1, Ordering::Relaxed);
    }
}
