//! In-memory reference count
//!
//! Counts acknowledged increments independently of the durable store. It is
//! never persisted and starts at 0 with every process.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

/// Lock-free, linearizable reference counter
#[derive(Debug, Default)]
pub struct ReferenceCounter {
    value: CachePadded<AtomicU64>,
}

impl ReferenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta`, returning the new value
    pub fn add(&self, delta: u64) -> u64 {
        self.value.fetch_add(delta, Ordering::SeqCst).wrapping_add(delta)
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::SeqCst);
    }
}
