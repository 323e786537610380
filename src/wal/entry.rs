//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

/// Header size: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single entry payload (64 MB)
pub const MAX_ENTRY_SIZE: u32 = 64 * 1024 * 1024;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operations to apply, in order, as one unit
    pub operations: Vec<Operation>,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { cf: String, key: Vec<u8>, value: Vec<u8> },

    /// Queue a merge operand for a key
    Merge { cf: String, key: Vec<u8>, operand: Vec<u8> },

    /// Delete a key
    Delete { cf: String, key: Vec<u8> },
}

impl Operation {
    /// Column family the operation targets
    pub fn column_family(&self) -> &str {
        match self {
            Operation::Put { cf, .. } | Operation::Merge { cf, .. } | Operation::Delete { cf, .. } => cf,
        }
    }
}

impl WalEntry {
    /// Create an entry holding the given operations
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            lsn,
            operations,
            timestamp,
        }
    }

    /// Create an entry holding a single operation
    pub fn single(lsn: u64, operation: Operation) -> Self {
        Self::new(lsn, vec![operation])
    }

    fn payload(&self) -> Result<Vec<u8>> {
        bincode::serialize(&(&self.operations, self.timestamp))
            .map_err(|e| TallyError::Serialization(e.to_string()))
    }

    /// CRC over LSN, payload length and payload
    fn crc_of(lsn: u64, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(&(payload.len() as u32).to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }

    /// Compute the checksum this entry is written with
    pub fn compute_crc(&self) -> Result<u32> {
        Ok(Self::crc_of(self.lsn, &self.payload()?))
    }

    /// Total on-disk size of this entry
    pub fn serialized_size(&self) -> Result<usize> {
        Ok(HEADER_SIZE + self.payload()?.len())
    }

    /// Serialize to `[LSN][CRC][Len][payload]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = self.payload()?;
        if payload.len() > MAX_ENTRY_SIZE as usize {
            return Err(TallyError::WalWrite(format!(
                "Entry payload too large: {} bytes (max {})",
                payload.len(),
                MAX_ENTRY_SIZE
            )));
        }

        let crc = Self::crc_of(self.lsn, &payload);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Deserialize a complete entry, verifying its checksum
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(TallyError::WalCorruption(format!(
                "Entry header too small: {} bytes",
                bytes.len()
            )));
        }

        let (lsn, crc, len) = parse_header(&bytes[..HEADER_SIZE]);
        if len > MAX_ENTRY_SIZE {
            return Err(TallyError::WalCorruption(format!(
                "Entry length {} exceeds maximum",
                len
            )));
        }

        let end = HEADER_SIZE + len as usize;
        if bytes.len() < end {
            return Err(TallyError::WalCorruption(format!(
                "Truncated entry: expected {} bytes, got {}",
                end,
                bytes.len()
            )));
        }

        Self::from_parts(lsn, crc, &bytes[HEADER_SIZE..end])
    }

    /// Build an entry from an already split header and payload
    pub(crate) fn from_parts(lsn: u64, crc: u32, payload: &[u8]) -> Result<Self> {
        let actual = Self::crc_of(lsn, payload);
        if actual != crc {
            return Err(TallyError::WalCorruption(format!(
                "CRC mismatch at LSN {}: stored {:#010x}, computed {:#010x}",
                lsn, crc, actual
            )));
        }

        let (operations, timestamp): (Vec<Operation>, u64) = bincode::deserialize(payload)
            .map_err(|e| TallyError::WalCorruption(format!("Undecodable payload: {}", e)))?;

        Ok(Self {
            lsn,
            operations,
            timestamp,
        })
    }
}

/// Split a 16-byte header into (lsn, crc, payload length)
pub(crate) fn parse_header(header: &[u8]) -> (u64, u32, u32) {
    let mut lsn = [0u8; 8];
    let mut crc = [0u8; 4];
    let mut len = [0u8; 4];
    lsn.copy_from_slice(&header[0..8]);
    crc.copy_from_slice(&header[8..12]);
    len.copy_from_slice(&header[12..16]);
    (
        u64::from_le_bytes(lsn),
        u32::from_le_bytes(crc),
        u32::from_le_bytes(len),
    )
}
