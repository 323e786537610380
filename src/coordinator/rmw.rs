//! Read-modify-write: the textbook lost-update bug, kept as a negative
//! control for the verification harness
//!
//! Two callers can read the same value and both write `value + 1`. Nothing
//! here prevents it. Do not use this strategy for real counters.

use std::thread;

use crate::adapter::{CounterKey, StorageAdapter};
use crate::error::Result;

use super::{Accounting, CoordinatorStats, RetryPolicy, WriteCoordinator, WriteStrategy};

/// `get` then `put`, with no lock in between
pub struct ReadModifyWriteCoordinator {
    adapter: StorageAdapter,
    counter: CounterKey,
    retry: RetryPolicy,
    accounting: Accounting,
}

impl ReadModifyWriteCoordinator {
    pub fn new(adapter: StorageAdapter, counter: CounterKey, retry: RetryPolicy) -> Self {
        Self {
            adapter,
            counter,
            retry,
            accounting: Accounting::default(),
        }
    }
}

impl WriteCoordinator for ReadModifyWriteCoordinator {
    fn strategy(&self) -> WriteStrategy {
        WriteStrategy::ReadModifyWrite
    }

    fn increment(&self, delta: u64) -> Result<()> {
        self.accounting.admit(1);

        let result = self.retry.run("read-modify-write", || {
            let current = self.adapter.get_u64(&self.counter)?;
            // Let another caller in between the read and the write
            thread::yield_now();
            self.adapter.put_u64(&self.counter, current.wrapping_add(delta))
        });

        self.accounting.settle(1, result.is_ok());
        result
    }

    fn stats(&self) -> CoordinatorStats {
        self.accounting.snapshot()
    }
}
