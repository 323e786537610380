//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{Result, TallyError};

use super::{WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries skipped
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether the WAL had bytes past the last valid entry
    pub was_truncated: bool,

    /// Length of the valid prefix of the file
    pub valid_bytes: u64,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Stop at the first corrupted or partially written entry
    /// 3. Truncate everything past the last valid entry
    /// 4. Return all valid entries in order
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let (entries, result) = Self::scan(path)?;

        if result.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(result.valid_bytes)?;
            file.sync_all()?;
            tracing::warn!(
                path = %path.display(),
                valid_bytes = result.valid_bytes,
                corrupted = result.entries_corrupted,
                "Truncated WAL tail past last valid entry"
            );
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::scan(path).map(|(_, result)| result)
    }

    fn scan(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let file_len = std::fs::metadata(path)?.len();
        let mut reader = WalReader::open(path)?;

        let mut entries = Vec::new();
        let mut corrupted = 0;
        let mut last_lsn = 0;

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    last_lsn = entry.lsn;
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(TallyError::WalCorruption(reason)) => {
                    tracing::warn!(
                        offset = reader.position(),
                        %reason,
                        "Corrupted WAL entry, discarding remainder of log"
                    );
                    corrupted += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let valid_bytes = reader.position();
        let result = RecoveryResult {
            entries_recovered: entries.len() as u64,
            entries_corrupted: corrupted,
            last_lsn,
            was_truncated: valid_bytes < file_len,
            valid_bytes,
        };

        Ok((entries, result))
    }
}
