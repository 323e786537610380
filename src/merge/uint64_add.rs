//! Unsigned 64-bit add

use crate::adapter::codec;
use crate::error::{Result, TallyError};

use super::MergeOperator;

/// Sums 8-byte big-endian `u64` operands onto an 8-byte base
///
/// A missing base counts as 0. Addition wraps at `u64::MAX`, which keeps
/// the fold associative and commutative.
#[derive(Debug, Clone, Copy, Default)]
pub struct UInt64AddOperator;

impl UInt64AddOperator {
    pub const NAME: &'static str = "uint64add";
}

impl MergeOperator for UInt64AddOperator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn full_merge(&self, key: &[u8], existing: Option<&[u8]>, operands: &[Vec<u8>]) -> Result<Vec<u8>> {
        let base = match existing {
            Some(bytes) => codec::decode(bytes).map_err(|e| {
                TallyError::MergeFailed(format!(
                    "base value of {:?} is not a u64: {}",
                    String::from_utf8_lossy(key),
                    e
                ))
            })?,
            None => 0,
        };

        let total = operands.iter().try_fold(base, |acc, operand| {
            codec::decode(operand)
                .map(|delta| acc.wrapping_add(delta))
                .map_err(|e| TallyError::MergeFailed(format!("bad operand: {}", e)))
        })?;

        Ok(codec::encode(total).to_vec())
    }

    fn partial_merge(&self, _key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>> {
        let left = codec::decode(left).ok()?;
        let right = codec::decode(right).ok()?;
        Some(codec::encode(left.wrapping_add(right)).to_vec())
    }
}
