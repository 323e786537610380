//! Fixed-width integer codec
//!
//! Counters and operands are 8-byte big-endian `u64`s on both the write
//! and the read path.

use crate::error::{Result, TallyError};

/// Width of an encoded value
pub const ENCODED_LEN: usize = 8;

pub fn encode(value: u64) -> [u8; ENCODED_LEN] {
    value.to_be_bytes()
}

/// Decode exactly 8 bytes; any other width is rejected
pub fn decode(bytes: &[u8]) -> Result<u64> {
    let fixed: [u8; ENCODED_LEN] = bytes.try_into().map_err(|_| {
        TallyError::Codec(format!(
            "expected {} bytes, got {}",
            ENCODED_LEN,
            bytes.len()
        ))
    })?;
    Ok(u64::from_be_bytes(fixed))
}
