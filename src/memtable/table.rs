//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{MemTableEntry, MergeBase};

/// A write to apply to the memtable
#[derive(Debug, Clone)]
pub enum MemTableOp {
    Put { cf: u32, key: Vec<u8>, value: Vec<u8> },
    Merge { cf: u32, key: Vec<u8>, operand: Vec<u8> },
    Delete { cf: u32, key: Vec<u8> },
}

struct Inner {
    data: BTreeMap<(u32, Vec<u8>), MemTableEntry>,
    /// Approximate size in bytes (keys + values + operands)
    size: usize,
}

/// In-memory table for recent writes
pub struct MemTable {
    inner: RwLock<Inner>,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                data: BTreeMap::new(),
                size: 0,
            }),
        }
    }

    /// Get an entry by key (read lock)
    pub fn get(&self, cf: u32, key: &[u8]) -> Option<MemTableEntry> {
        // BTreeMap lookup needs an owned tuple key
        self.inner.read().data.get(&(cf, key.to_vec())).cloned()
    }

    /// Put a key-value pair. Returns the new approximate size.
    pub fn put(&self, cf: u32, key: Vec<u8>, value: Vec<u8>) -> usize {
        self.apply(vec![MemTableOp::Put { cf, key, value }])
    }

    /// Queue a merge operand. Returns the new approximate size.
    pub fn merge(&self, cf: u32, key: Vec<u8>, operand: Vec<u8>) -> usize {
        self.apply(vec![MemTableOp::Merge { cf, key, operand }])
    }

    /// Delete a key (inserts tombstone). Returns the new approximate size.
    pub fn delete(&self, cf: u32, key: Vec<u8>) -> usize {
        self.apply(vec![MemTableOp::Delete { cf, key }])
    }

    /// Apply several writes under a single write lock
    pub fn apply(&self, ops: Vec<MemTableOp>) -> usize {
        let mut inner = self.inner.write();

        for op in ops {
            match op {
                MemTableOp::Put { cf, key, value } => {
                    Self::replace(&mut inner, (cf, key), MemTableEntry::Value(value));
                }
                MemTableOp::Delete { cf, key } => {
                    Self::replace(&mut inner, (cf, key), MemTableEntry::Tombstone);
                }
                MemTableOp::Merge { cf, key, operand } => {
                    let key = (cf, key);
                    let added = operand.len();
                    let is_new = !inner.data.contains_key(&key);
                    let key_len = key.1.len();

                    let next = match inner.data.remove(&key) {
                        None => MemTableEntry::Merge {
                            base: MergeBase::Pending,
                            operands: vec![operand],
                        },
                        Some(MemTableEntry::Value(value)) => MemTableEntry::Merge {
                            base: MergeBase::Value(value),
                            operands: vec![operand],
                        },
                        Some(MemTableEntry::Tombstone) => MemTableEntry::Merge {
                            base: MergeBase::Absent,
                            operands: vec![operand],
                        },
                        Some(MemTableEntry::Merge { base, mut operands }) => {
                            operands.push(operand);
                            MemTableEntry::Merge { base, operands }
                        }
                    };

                    inner.data.insert(key, next);
                    inner.size += added + if is_new { key_len } else { 0 };
                }
            }
        }

        inner.size
    }

    fn replace(inner: &mut Inner, key: (u32, Vec<u8>), entry: MemTableEntry) {
        let key_len = key.1.len();
        let added = entry_size(&entry);
        match inner.data.insert(key, entry) {
            Some(old) => inner.size = inner.size.saturating_sub(entry_size(&old)) + added,
            None => inner.size += key_len + added,
        }
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.inner.read().size
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.inner.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }

    /// Check if should flush (size >= limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }

    /// Column families with at least one entry
    pub fn column_families(&self) -> Vec<u32> {
        let inner = self.inner.read();
        let mut ids: Vec<u32> = inner.data.keys().map(|(cf, _)| *cf).collect();
        ids.dedup();
        ids
    }

    /// Snapshot of one column family's entries, in sorted key order
    pub fn entries(&self, cf: u32) -> Vec<(Vec<u8>, MemTableEntry)> {
        let inner = self.inner.read();
        inner
            .data
            .range((cf, Vec::new())..)
            .take_while(|((id, _), _)| *id == cf)
            .map(|((_, key), entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Drop one column family's entries (after that family is flushed)
    pub fn clear_column_family(&self, cf: u32) {
        let mut inner = self.inner.write();
        let keys: Vec<(u32, Vec<u8>)> = inner
            .data
            .range((cf, Vec::new())..)
            .take_while(|((id, _), _)| *id == cf)
            .map(|(key, _)| key.clone())
            .collect();

        for key in keys {
            if let Some(entry) = inner.data.remove(&key) {
                inner.size = inner.size.saturating_sub(key.1.len() + entry_size(&entry));
            }
        }
    }

    /// Clear all entries (after successful flush)
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.data.clear();
        inner.size = 0;
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_size(entry: &MemTableEntry) -> usize {
    match entry {
        MemTableEntry::Value(v) => v.len(),
        MemTableEntry::Tombstone => 0,
        MemTableEntry::Merge { base, operands } => {
            let base_len = match base {
                MergeBase::Value(v) => v.len(),
                MergeBase::Absent | MergeBase::Pending => 0,
            };
            base_len + operands.iter().map(Vec::len).sum::<usize>()
        }
    }
}
