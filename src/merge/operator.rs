//! Merge operator trait

use crate::error::{Result, TallyError};

/// A function the engine applies to fold operands onto a base value
///
/// The engine may fold at any time: on a read (without persisting the
/// result) or on a flush. For an accumulator to be correct under that
/// freedom, `full_merge` must give the same answer for any grouping and
/// order of the same operands.
pub trait MergeOperator: Send + Sync {
    /// Name used in logs and for lookup by [`super::operator_by_name`]
    fn name(&self) -> &'static str;

    /// Fold `operands` (oldest first) onto `existing`
    ///
    /// `existing` is `None` when the key has no base value: it was never
    /// put, or it was deleted.
    fn full_merge(&self, key: &[u8], existing: Option<&[u8]>, operands: &[Vec<u8>]) -> Result<Vec<u8>>;

    /// Combine two adjacent operands into one, without a base
    ///
    /// `None` means the pair cannot be combined and both must be kept.
    fn partial_merge(&self, _key: &[u8], _left: &[u8], _right: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// Last operand wins, base ignored
///
/// This is what a merge degenerates into when no accumulating operator is
/// in place. It exists so the startup self-test can be shown to catch it;
/// never register it for a counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverwriteOperator;

impl OverwriteOperator {
    pub const NAME: &'static str = "overwrite";
}

impl MergeOperator for OverwriteOperator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn full_merge(&self, _key: &[u8], existing: Option<&[u8]>, operands: &[Vec<u8>]) -> Result<Vec<u8>> {
        operands
            .last()
            .cloned()
            .or_else(|| existing.map(<[u8]>::to_vec))
            .ok_or_else(|| TallyError::MergeFailed("nothing to merge".to_string()))
    }
}
