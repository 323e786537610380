//! Write batches
//!
//! An ordered list of operations applied as one unit: one WAL entry, one
//! memtable lock acquisition. Nothing in a batch is applied unless all of it
//! is.

use super::ColumnFamilyHandle;

/// A single operation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Put {
        cf: ColumnFamilyHandle,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Merge {
        cf: ColumnFamilyHandle,
        key: Vec<u8>,
        operand: Vec<u8>,
    },
    Delete {
        cf: ColumnFamilyHandle,
        key: Vec<u8>,
    },
}

impl BatchOp {
    pub fn column_family(&self) -> &ColumnFamilyHandle {
        match self {
            BatchOp::Put { cf, .. } | BatchOp::Merge { cf, .. } | BatchOp::Delete { cf, .. } => cf,
        }
    }
}

/// Ordered set of operations written atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    pub fn put(&mut self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> &mut Self {
        self.ops.push(BatchOp::Put {
            cf: cf.clone(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self
    }

    pub fn merge(&mut self, cf: &ColumnFamilyHandle, key: &[u8], operand: &[u8]) -> &mut Self {
        self.ops.push(BatchOp::Merge {
            cf: cf.clone(),
            key: key.to_vec(),
            operand: operand.to_vec(),
        });
        self
    }

    pub fn delete(&mut self, cf: &ColumnFamilyHandle, key: &[u8]) -> &mut Self {
        self.ops.push(BatchOp::Delete {
            cf: cf.clone(),
            key: key.to_vec(),
        });
        self
    }

    /// Append an already built operation
    pub fn push(&mut self, op: BatchOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchOp> {
        self.ops.iter()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

impl FromIterator<BatchOp> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = BatchOp>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}
