//! FILENAME: store/src/tracker.rs
//!
//! Instance-id allocation and open-instance accounting. Callers share one
//! tracker (usually via `Arc`) and hand it to every list instance they build;
//! tests assert `open_count` returns to zero to catch leaked instances.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

#[derive(Debug)]
pub struct InstanceTracker {
    next_id: AtomicU32,
    open: AtomicI64,
}

impl Default for InstanceTracker {
    fn default() -> Self {
        InstanceTracker {
            next_id: AtomicU32::new(1),
            open: AtomicI64::new(0),
        }
    }
}

impl InstanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh instance id and count it as open.
    pub fn acquire(&self) -> u32 {
        self.open.fetch_add(1, Ordering::Relaxed);
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn release(&self) {
        self.open.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn open_count(&self) -> i64 {
        self.open.load(Ordering::Relaxed)
    }
}
