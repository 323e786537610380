//! Storage Module
//!
//! Persistent storage layer using SSTable-like format.
//!
//! ## Responsibilities
//! - Persist data to disk in sorted format
//! - Point lookups newest → oldest
//! - Compaction of a column family's tables into one
//! - Track the highest WAL sequence number already persisted
//!
//! Each column family owns one [`StorageManager`] rooted at
//! `{data_dir}/sstables/{cf}/`.

mod sstable;
mod manager;

pub use sstable::{SSTable, SSTableBuilder, SSTableIterator, SSTableReader};
pub use manager::StorageManager;
