//! Task id allocation shared by every monitor.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::task::TaskId;

/// Hands out globally unique, strictly increasing task ids.
///
/// A single atomic counter: concurrent callers never observe the same id, and
/// every id is greater than all ids returned before it.
#[derive(Debug)]
pub struct TaskIdAllocator {
    next: AtomicU64,
}

impl TaskIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> TaskId {
        TaskId::from(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TaskIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
