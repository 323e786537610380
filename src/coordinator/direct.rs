//! Direct strategies: every request goes straight to the engine
//!
//! Correctness rests on the engine serializing concurrent writers on its
//! own, which `Engine` does with its write lock.

use crate::adapter::{CounterKey, StorageAdapter};
use crate::error::Result;

use super::{Accounting, CoordinatorStats, RetryPolicy, WriteCoordinator, WriteStrategy};

/// How a direct request is shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectMode {
    /// One `merge` call
    Merge,
    /// One write batch holding a single merge
    Batch,
}

/// Issues one engine write per increment, without an external lock
pub struct DirectCoordinator {
    adapter: StorageAdapter,
    counter: CounterKey,
    retry: RetryPolicy,
    mode: DirectMode,
    accounting: Accounting,
}

impl DirectCoordinator {
    pub fn new(adapter: StorageAdapter, counter: CounterKey, retry: RetryPolicy, mode: DirectMode) -> Self {
        Self {
            adapter,
            counter,
            retry,
            mode,
            accounting: Accounting::default(),
        }
    }
}

impl WriteCoordinator for DirectCoordinator {
    fn strategy(&self) -> WriteStrategy {
        match self.mode {
            DirectMode::Merge => WriteStrategy::DirectMerge,
            DirectMode::Batch => WriteStrategy::DirectBatch,
        }
    }

    fn increment(&self, delta: u64) -> Result<()> {
        self.accounting.admit(1);

        let result = match self.mode {
            DirectMode::Merge => self
                .retry
                .run("merge", || self.adapter.merge_u64(&self.counter, delta)),
            DirectMode::Batch => self.retry.run("batch merge", || {
                self.adapter
                    .write_batch(vec![StorageAdapter::merge_op(&self.counter, delta)])
            }),
        };

        self.accounting.settle(1, result.is_ok());
        result
    }

    fn stats(&self) -> CoordinatorStats {
        self.accounting.snapshot()
    }
}
