//! Column family handles

use std::fmt;
use std::sync::Arc;

/// Cheap, cloneable reference to an open column family
///
/// Handles are only meaningful for the engine that issued them.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ColumnFamilyHandle {
    id: u32,
    name: Arc<str>,
}

impl ColumnFamilyHandle {
    pub(crate) fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: Arc::from(name),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ColumnFamilyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnFamily({}#{})", self.name, self.id)
    }
}

/// Names are directory names on disk: ASCII alphanumerics, `_` and `-`
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
