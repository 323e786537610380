//! The contract the counter layer expects from an embedded engine

use crate::error::Result;

use super::{ColumnFamilyHandle, Engine, WriteBatch};

/// An embedded, column-family-aware key-value engine with merge support
///
/// Implementations must be safe to call from many threads at once. A
/// successful return means the write is applied and visible to `get`; an
/// error means nothing was applied, so retrying never double-applies.
pub trait StorageEngine: Send + Sync {
    /// Look up an open column family by name
    fn cf_handle(&self, name: &str) -> Option<ColumnFamilyHandle>;

    /// Read a key, folding any pending merge operands
    fn get(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> Result<()>;

    /// Queue an operand for the column family's merge operator
    fn merge(&self, cf: &ColumnFamilyHandle, key: &[u8], operand: &[u8]) -> Result<()>;

    fn delete(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<()>;

    /// Apply every operation of the batch, or none of them
    fn write(&self, batch: WriteBatch) -> Result<()>;
}

impl StorageEngine for Engine {
    fn cf_handle(&self, name: &str) -> Option<ColumnFamilyHandle> {
        Engine::cf_handle(self, name)
    }

    fn get(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Engine::get(self, cf, key)
    }

    fn put(&self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> Result<()> {
        Engine::put(self, cf, key, value)
    }

    fn merge(&self, cf: &ColumnFamilyHandle, key: &[u8], operand: &[u8]) -> Result<()> {
        Engine::merge(self, cf, key, operand)
    }

    fn delete(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<()> {
        Engine::delete(self, cf, key)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        Engine::write(self, batch)
    }
}
