//! Storage Adapter
//!
//! Wraps the shared engine handle with counter-shaped operations: column
//! family lookup, `u64` encoding, and error classification for reads.
//!
//! ## Error Contract
//! - A missing key is not an error: `get` returns `None`, `get_u64` returns 0
//! - Any other read failure is surfaced as `ReadFailed`
//! - Write errors are returned untouched so the coordinator can decide
//!   whether to retry them

pub mod codec;

use std::sync::Arc;

use crate::engine::{BatchOp, ColumnFamilyHandle, StorageEngine, WriteBatch};
use crate::error::{Result, TallyError};

pub use codec::{decode, encode};

/// A counter's location: column family + key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterKey {
    pub cf: ColumnFamilyHandle,
    pub key: Vec<u8>,
}

impl CounterKey {
    pub fn new(cf: ColumnFamilyHandle, key: impl Into<Vec<u8>>) -> Self {
        Self { cf, key: key.into() }
    }
}

/// Thin, cloneable wrapper over the shared engine handle
#[derive(Clone)]
pub struct StorageAdapter {
    engine: Arc<dyn StorageEngine>,
}

impl StorageAdapter {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// The wrapped engine
    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Resolve a column family handle by name
    pub fn column_family(&self, name: &str) -> Result<ColumnFamilyHandle> {
        self.engine
            .cf_handle(name)
            .ok_or_else(|| TallyError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Locate a counter by column family name and key
    pub fn counter_key(&self, cf: &str, key: impl Into<Vec<u8>>) -> Result<CounterKey> {
        Ok(CounterKey::new(self.column_family(cf)?, key))
    }

    // =========================================================================
    // Raw Bytes
    // =========================================================================

    pub fn get(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.engine
            .get(cf, key)
            .map_err(|e| TallyError::ReadFailed(Box::new(e)))
    }

    pub fn put(&self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> Result<()> {
        self.engine.put(cf, key, value)
    }

    pub fn merge(&self, cf: &ColumnFamilyHandle, key: &[u8], operand: &[u8]) -> Result<()> {
        self.engine.merge(cf, key, operand)
    }

    pub fn delete(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<()> {
        self.engine.delete(cf, key)
    }

    /// Apply ordered operations as one atomic unit
    pub fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.engine.write(ops.into_iter().collect::<WriteBatch>())
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Decoded counter value; a missing key reads as 0
    pub fn get_u64(&self, counter: &CounterKey) -> Result<u64> {
        match self.get(&counter.cf, &counter.key)? {
            Some(bytes) => decode(&bytes).map_err(|e| TallyError::ReadFailed(Box::new(e))),
            None => Ok(0),
        }
    }

    /// Overwrite the counter with `value` (a put, never a merge)
    pub fn put_u64(&self, counter: &CounterKey, value: u64) -> Result<()> {
        self.put(&counter.cf, &counter.key, &encode(value))
    }

    /// Queue `delta` onto the counter through the merge operator
    pub fn merge_u64(&self, counter: &CounterKey, delta: u64) -> Result<()> {
        self.merge(&counter.cf, &counter.key, &encode(delta))
    }

    /// A merge of `delta` as a batch operation
    pub fn merge_op(counter: &CounterKey, delta: u64) -> BatchOp {
        BatchOp::Merge {
            cf: counter.cf.clone(),
            key: counter.key.clone(),
            operand: encode(delta).to_vec(),
        }
    }
}
