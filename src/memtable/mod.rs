//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Queue merge operands until a read or a flush folds them
//! - Track size for flush triggers
//! - Ordered iteration for SSTable creation
//!
//! ## Data Structure Choice
//! One BTreeMap keyed by `(column family id, key)` wrapped in a RwLock:
//! - Ordered keys per column family (required for SSTable generation)
//! - A whole write batch, across column families, lands under one lock
//!   acquisition, so readers never see half of a batch

mod table;

pub use table::{MemTable, MemTableOp};

/// Entry stored in the MemTable
#[derive(Debug, Clone, PartialEq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,

    /// Merge operands (oldest first) waiting to be folded onto `base`
    Merge {
        base: MergeBase,
        operands: Vec<Vec<u8>>,
    },
}

/// What a queue of merge operands folds onto
#[derive(Debug, Clone, PartialEq)]
pub enum MergeBase {
    /// A value put earlier in this memtable
    Value(Vec<u8>),

    /// The key was deleted earlier in this memtable
    Absent,

    /// Unknown here; the base lives in the SSTables (or nowhere)
    Pending,
}
