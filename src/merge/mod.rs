//! Merge Module
//!
//! Associative combine functions the engine runs to fold queued merge
//! operands onto a base value.
//!
//! ## Registration
//! A column family only accumulates if it was opened with a merge operator
//! (see [`crate::config::ColumnFamilyOptions`]). Without one, the engine
//! rejects merges outright. [`self_test`] checks at startup that the
//! operator registered for the counter family really accumulates.

mod operator;
mod uint64_add;

use std::sync::Arc;

pub use operator::{MergeOperator, OverwriteOperator};
pub use self_test::{self_test, SELF_TEST_KEY};
pub use uint64_add::UInt64AddOperator;

/// Resolve a merge operator by its registered name
pub fn operator_by_name(name: &str) -> Option<Arc<dyn MergeOperator>> {
    match name {
        UInt64AddOperator::NAME => Some(Arc::new(UInt64AddOperator)),
        OverwriteOperator::NAME => Some(Arc::new(OverwriteOperator)),
        _ => None,
    }
}
