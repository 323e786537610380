//! Counter Service
//!
//! The façade callers use. One method per operation of the reference
//! counter service:
//!
//! | Operation            | Effect                                              |
//! |----------------------|-----------------------------------------------------|
//! | `increment`          | +1 through the configured coordinator               |
//! | `batch_increment`    | +1 as a single-merge write batch                    |
//! | `increment_reference`| +1 on the reference count only                      |
//! | `get`                | stored count and reference count                    |
//! | `reset`              | stored count and reference count back to 0          |
//! | `simple_read`        | probe value read through the engine                 |
//! | `simple_read_cached` | probe value read from the in-memory cache           |
//!
//! The reference count is bumped only after the coordinator acknowledges the
//! write, so a failed increment never shows up in it.

mod oracle;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::adapter::{CounterKey, StorageAdapter};
use crate::config::Config;
use crate::coordinator::{self, CoordinatorStats, RetryPolicy, WriteCoordinator, WriteStrategy};
use crate::engine::{ColumnFamilyHandle, StorageEngine};
use crate::error::Result;
use crate::merge;

pub use oracle::ReferenceCounter;

/// Stored and reference counts read side by side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    /// Decoded value of the durable counter
    pub stored: u64,
    /// In-memory count of acknowledged increments
    pub oracle: u64,
}

impl CounterSnapshot {
    pub fn is_consistent(&self) -> bool {
        self.stored == self.oracle
    }
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current stored count is {}", self.stored)?;
        write!(f, "Current reference count is {}", self.oracle)
    }
}

/// Activity of both write paths plus the reference count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStats {
    pub strategy: WriteStrategy,
    /// `increment` path
    pub coordinator: CoordinatorStats,
    /// `batch_increment` path
    pub batch: CoordinatorStats,
    pub oracle: u64,
}

impl ServiceStats {
    pub fn in_flight(&self) -> u64 {
        self.coordinator.in_flight() + self.batch.in_flight()
    }

    pub fn applied(&self) -> u64 {
        self.coordinator.applied + self.batch.applied
    }

    pub fn failed(&self) -> u64 {
        self.coordinator.failed + self.batch.failed
    }
}

/// Counter façade over a shared engine
pub struct CounterService {
    adapter: StorageAdapter,
    counter: CounterKey,
    coordinator: Arc<dyn WriteCoordinator>,
    batch: Arc<dyn WriteCoordinator>,
    oracle: ReferenceCounter,
    probe_cf: ColumnFamilyHandle,
    probe_key: Vec<u8>,
    cache: RwLock<HashMap<Vec<u8>, String>>,
    retry: RetryPolicy,
}

impl CounterService {
    /// Wire the service onto an open engine
    ///
    /// Fails if either configured column family is missing or if the
    /// counter family's merge operator does not accumulate. Seeds the probe
    /// value in the engine and in the cache.
    pub fn new(engine: Arc<dyn StorageEngine>, config: &Config) -> Result<Self> {
        let adapter = StorageAdapter::new(engine);
        let counter = adapter.counter_key(&config.counter_column_family, config.counter_key.clone())?;

        merge::self_test(adapter.engine().as_ref(), &counter.cf)?;

        let probe_cf = adapter.column_family(&config.probe_column_family)?;
        let probe_key = config.counter_key.clone();
        adapter.put(&probe_cf, &probe_key, &probe_key)?;

        let mut cache = HashMap::new();
        cache.insert(
            probe_key.clone(),
            String::from_utf8_lossy(&probe_key).into_owned(),
        );

        let coordinator = coordinator::build(
            config.write_strategy,
            adapter.clone(),
            counter.clone(),
            config,
        )?;
        let batch = coordinator::build(
            WriteStrategy::DirectBatch,
            adapter.clone(),
            counter.clone(),
            config,
        )?;

        tracing::info!(
            strategy = %config.write_strategy,
            cf = counter.cf.name(),
            probe_cf = probe_cf.name(),
            "Counter service ready"
        );

        Ok(Self {
            adapter,
            counter,
            coordinator,
            batch,
            oracle: ReferenceCounter::new(),
            probe_cf,
            probe_key,
            cache: RwLock::new(cache),
            retry: config.retry,
        })
    }

    pub fn counter(&self) -> &CounterKey {
        &self.counter
    }

    pub fn strategy(&self) -> WriteStrategy {
        self.coordinator.strategy()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Add 1 through the configured coordinator
    pub fn increment(&self) -> Result<()> {
        self.increment_by(1)
    }

    /// Add `delta` through the configured coordinator
    pub fn increment_by(&self, delta: u64) -> Result<()> {
        self.coordinator.increment(delta)?;
        self.oracle.add(delta);
        Ok(())
    }

    /// Add 1 as a write batch holding a single merge
    pub fn batch_increment(&self) -> Result<()> {
        self.batch.increment(1)?;
        self.oracle.add(1);
        Ok(())
    }

    /// Add 1 to the reference count without touching the store
    pub fn increment_reference(&self) -> u64 {
        self.oracle.add(1)
    }

    /// Put 0 into the store, then zero the reference count
    ///
    /// The two writes are not atomic together: an increment acknowledged
    /// between them lands in the store but not in the reference count.
    pub fn reset(&self) -> Result<CounterSnapshot> {
        self.retry
            .run("reset", || self.adapter.put_u64(&self.counter, 0))?;
        self.oracle.reset();
        tracing::info!(cf = self.counter.cf.name(), "Counter reset");
        self.get()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Stored and reference counts
    pub fn get(&self) -> Result<CounterSnapshot> {
        let stored = self.adapter.get_u64(&self.counter)?;
        let oracle = self.oracle.get();
        Ok(CounterSnapshot { stored, oracle })
    }

    /// Probe value read through the engine
    pub fn simple_read(&self) -> Result<Option<String>> {
        let value = self.adapter.get(&self.probe_cf, &self.probe_key)?;
        Ok(value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Probe value read from the in-memory cache
    pub fn simple_read_cached(&self) -> Option<String> {
        self.cache.read().get(&self.probe_key).cloned()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Requests admitted on either write path but not yet settled
    pub fn in_flight(&self) -> u64 {
        self.coordinator.in_flight() + self.batch.in_flight()
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            strategy: self.coordinator.strategy(),
            coordinator: self.coordinator.stats(),
            batch: self.batch.stats(),
            oracle: self.oracle.get(),
        }
    }

    /// Stop both write paths; later increments fail with `CoordinatorClosed`
    /// on the serialized strategy
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
        self.batch.shutdown();
        tracing::debug!("Counter service shut down");
    }
}
