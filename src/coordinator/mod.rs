//! Write Coordinator
//!
//! Decides how an increment reaches the engine. Every strategy is bound to
//! one counter and reports what it has admitted and settled, which lets the
//! harness tell when the system has gone quiet.
//!
//! ## Strategies
//! - `direct`: one merge per request, engine-internal serialization only
//! - `batch`: one single-merge write batch per request
//! - `serialized`: bounded queue into one writer thread that batches requests
//! - `rmw`: unsynchronized get-then-put, loses updates under concurrency
//!
//! ## Failure Policy
//! Transient I/O errors are retried with capped exponential backoff. Every
//! error that escapes is a `WriteFailed` carrying the attempt count, and a
//! failed write has applied nothing.

pub mod direct;
pub mod retry;
pub mod rmw;
pub mod serialized;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

use crate::adapter::{CounterKey, StorageAdapter};
use crate::config::Config;
use crate::error::{Result, TallyError};

pub use direct::{DirectCoordinator, DirectMode};
pub use retry::RetryPolicy;
pub use rmw::ReadModifyWriteCoordinator;
pub use serialized::SerializedCoordinator;

/// How increments are delivered to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteStrategy {
    DirectMerge,
    DirectBatch,
    Serialized,
    ReadModifyWrite,
}

impl WriteStrategy {
    /// All strategies, in the order reports list them
    pub const ALL: [WriteStrategy; 4] = [
        WriteStrategy::DirectMerge,
        WriteStrategy::DirectBatch,
        WriteStrategy::Serialized,
        WriteStrategy::ReadModifyWrite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStrategy::DirectMerge => "direct",
            WriteStrategy::DirectBatch => "batch",
            WriteStrategy::Serialized => "serialized",
            WriteStrategy::ReadModifyWrite => "rmw",
        }
    }

    /// Whether the strategy keeps the stored total exact under concurrency
    pub fn is_exact(&self) -> bool {
        !matches!(self, WriteStrategy::ReadModifyWrite)
    }
}

impl fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteStrategy {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "direct" | "direct-merge" | "merge" => Ok(WriteStrategy::DirectMerge),
            "batch" | "direct-batch" => Ok(WriteStrategy::DirectBatch),
            "serialized" | "single-writer" => Ok(WriteStrategy::Serialized),
            "rmw" | "read-modify-write" => Ok(WriteStrategy::ReadModifyWrite),
            other => Err(TallyError::Config(format!(
                "unknown write strategy '{}' (expected direct, batch, serialized or rmw)",
                other
            ))),
        }
    }
}

/// Counters describing a coordinator's lifetime activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Requests accepted by `increment`
    pub admitted: u64,
    /// Requests acknowledged as durable
    pub applied: u64,
    /// Requests that returned an error
    pub failed: u64,
    /// Engine write batches committed by the single writer
    pub batches: u64,
}

impl CoordinatorStats {
    /// Requests admitted but not yet settled
    pub fn in_flight(&self) -> u64 {
        self.admitted
            .saturating_sub(self.applied)
            .saturating_sub(self.failed)
    }
}

/// Delivers increments for one counter
pub trait WriteCoordinator: Send + Sync {
    fn strategy(&self) -> WriteStrategy;

    /// Add `delta` to the counter. Blocks until the write is durable or has
    /// failed; on error nothing was applied.
    fn increment(&self, delta: u64) -> Result<()>;

    fn stats(&self) -> CoordinatorStats;

    /// Requests admitted but not yet acknowledged or failed
    fn in_flight(&self) -> u64 {
        self.stats().in_flight()
    }

    /// Stop accepting work and wait for background threads
    fn shutdown(&self) {}
}

/// Build the coordinator `strategy` names for `counter`
pub fn build(
    strategy: WriteStrategy,
    adapter: StorageAdapter,
    counter: CounterKey,
    config: &Config,
) -> Result<Arc<dyn WriteCoordinator>> {
    tracing::debug!(%strategy, cf = counter.cf.name(), "Building write coordinator");

    let coordinator: Arc<dyn WriteCoordinator> = match strategy {
        WriteStrategy::DirectMerge => Arc::new(DirectCoordinator::new(
            adapter,
            counter,
            config.retry,
            DirectMode::Merge,
        )),
        WriteStrategy::DirectBatch => Arc::new(DirectCoordinator::new(
            adapter,
            counter,
            config.retry,
            DirectMode::Batch,
        )),
        WriteStrategy::Serialized => Arc::new(SerializedCoordinator::spawn(
            adapter,
            counter,
            config.retry,
            config.queue_capacity,
            config.max_batch_size,
        )?),
        WriteStrategy::ReadModifyWrite => {
            tracing::warn!("read-modify-write strategy loses updates under concurrency");
            Arc::new(ReadModifyWriteCoordinator::new(adapter, counter, config.retry))
        }
    };

    Ok(coordinator)
}

/// Shared admitted/settled bookkeeping
///
/// `admitted` is bumped before the write starts and `applied`/`failed` after
/// it settles, so `admitted - applied - failed` never undercounts work that
/// is still running.
#[derive(Debug, Default)]
pub(crate) struct Accounting {
    admitted: CachePadded<AtomicU64>,
    applied: CachePadded<AtomicU64>,
    failed: CachePadded<AtomicU64>,
    batches: CachePadded<AtomicU64>,
}

impl Accounting {
    pub(crate) fn admit(&self, count: u64) {
        self.admitted.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn settle(&self, count: u64, ok: bool) {
        if ok {
            self.applied.fetch_add(count, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(count, Ordering::SeqCst);
        }
    }

    pub(crate) fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CoordinatorStats {
        // Settled counters first so a concurrent admit can only inflate in_flight
        let applied = self.applied.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let batches = self.batches.load(Ordering::Relaxed);
        let admitted = self.admitted.load(Ordering::SeqCst);
        CoordinatorStats {
            admitted,
            applied,
            failed,
            batches,
        }
    }
}
