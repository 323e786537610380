//! WAL Writer
//!
//! Handles appending entries to the WAL file.
//!
//! A failed append never leaves bytes behind: the file is cut back to the end
//! of the last acknowledged entry. If that cut fails too the writer refuses
//! all further appends.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{Result, TallyError};

use super::{Operation, WalEntry, WalRecovery};

/// Writes entries to the WAL file
pub struct WalWriter {
    file: File,
    path: PathBuf,
    /// LSN assigned to the next appended entry
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Entries appended since the last fsync
    unsynced: usize,
    /// End of the last acknowledged entry
    offset: u64,
    poisoned: bool,
}

impl WalWriter {
    /// Open or create a WAL file
    ///
    /// An existing file is scanned so LSNs continue after its last valid
    /// entry; a torn tail is cut off before anything is appended.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        Self::open_with_lsn(path, sync_strategy, 1)
    }

    /// Open a WAL whose next LSN is at least `min_next_lsn`
    pub fn open_with_lsn(
        path: &Path,
        sync_strategy: WalSyncStrategy,
        min_next_lsn: u64,
    ) -> Result<Self> {
        let (last_lsn, offset) = if path.exists() {
            let (_, result) = WalRecovery::recover(path)?;
            (result.last_lsn, result.valid_bytes)
        } else {
            (0, 0)
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            next_lsn: (last_lsn + 1).max(min_next_lsn),
            sync_strategy,
            unsynced: 0,
            offset,
            poisoned: false,
        })
    }

    /// Append a single operation, returning its LSN
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        self.append_batch(vec![operation])
    }

    /// Append several operations as one entry, returning its LSN
    pub fn append_batch(&mut self, operations: Vec<Operation>) -> Result<u64> {
        if self.poisoned {
            return Err(TallyError::WalWrite(format!(
                "WAL {} is unusable after a failed rollback",
                self.path.display()
            )));
        }

        let lsn = self.next_lsn;
        let bytes = WalEntry::new(lsn, operations).serialize()?;

        if let Err(e) = self.file.write_all(&bytes) {
            self.rollback();
            return Err(e.into());
        }

        self.unsynced += 1;
        let must_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count.max(1),
        };
        if must_sync {
            if let Err(e) = self.file.sync_data() {
                self.rollback();
                return Err(e.into());
            }
            self.unsynced = 0;
        }

        self.offset += bytes.len() as u64;
        self.next_lsn += 1;
        tracing::trace!(lsn, bytes = bytes.len(), "WAL append");
        Ok(lsn)
    }

    /// Cut the file back to the last acknowledged entry
    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.offset) {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "WAL rollback failed, refusing further appends"
            );
            self.poisoned = true;
        }
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Discard all entries (they are durable elsewhere). LSNs keep counting.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.offset = 0;
        self.unsynced = 0;
        Ok(())
    }

    /// Get the LSN the next append will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// LSN of the most recent append (0 if none)
    pub fn last_lsn(&self) -> u64 {
        self.next_lsn - 1
    }

    /// Size of the acknowledged log in bytes
    pub fn size(&self) -> u64 {
        self.offset
    }
}
