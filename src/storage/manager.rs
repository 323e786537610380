//! Storage Manager
//!
//! Manages the SSTables of one column family and coordinates reads/writes.
//!
//! ## Responsibilities
//! - Discover existing SSTables on startup
//! - Search SSTables newest → oldest for reads
//! - Create new SSTables from folded memtable entries
//! - Compact all tables into one

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{Result, TallyError};

use super::{SSTable, SSTableBuilder, SSTableReader};

/// Suffix of a table still being written
const TMP_EXTENSION: &str = "tmp";

/// Manages the storage layer of one column family
///
/// ## Concurrency:
/// - `sstables`: Protected by RwLock (exclusive while seeking, see `get`)
/// - `next_sstable_id`, `flushed_lsn`: Atomic counters (lock-free)
/// - All methods use `&self` (no exclusive access needed)
pub struct StorageManager {
    /// Directory where SSTables are stored
    data_dir: PathBuf,

    /// Open SSTable readers, ordered newest → oldest
    sstables: RwLock<Vec<SSTableReader>>,

    /// Next ID for creating new SSTables (atomic, lock-free)
    next_sstable_id: AtomicU64,

    /// Highest WAL sequence number persisted in any table
    flushed_lsn: AtomicU64,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Discover existing SSTable files, removing unfinished ones
    /// 3. Open readers for each (loads indexes into RAM)
    /// 4. Order by ID descending (newest first)
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut sstable_ids: Vec<u64> = Vec::new();
        for entry in fs::read_dir(path)? {
            let file_path = entry?.path();
            if file_path.is_file() {
                if file_path.extension().is_some_and(|ext| ext == TMP_EXTENSION) {
                    tracing::warn!(path = %file_path.display(), "Removing unfinished SSTable");
                    Self::remove_partial(&file_path);
                    continue;
                }
                if let Some(id) = Self::parse_sstable_id(&file_path) {
                    sstable_ids.push(id);
                }
            }
        }

        // Newest first (highest ID first)
        sstable_ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut sstables = Vec::with_capacity(sstable_ids.len());
        let mut flushed_lsn = 0;
        for id in &sstable_ids {
            let reader = SSTableReader::open(&Self::sstable_path_with_dir(path, *id))?;
            flushed_lsn = flushed_lsn.max(reader.max_lsn());
            sstables.push(reader);
        }

        let next_id = sstable_ids.first().map(|&id| id + 1).unwrap_or(1);

        tracing::debug!(
            dir = %path.display(),
            sstables = sstables.len(),
            flushed_lsn,
            "Opened storage"
        );

        Ok(Self {
            data_dir: path.to_path_buf(),
            sstables: RwLock::new(sstables),
            next_sstable_id: AtomicU64::new(next_id),
            flushed_lsn: AtomicU64::new(flushed_lsn),
        })
    }

    /// Get a value by key (searches all SSTables newest → oldest)
    ///
    /// Returns:
    /// - `Ok(Some(value))`: key found with value
    /// - `Ok(None)`: key not found, or found tombstone (deleted)
    ///
    /// Uses the write lock because SSTableReader::get() moves the file cursor.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut sstables = self.sstables.write();

        for reader in sstables.iter_mut() {
            if !reader.might_contain(key) {
                continue;
            }

            match reader.get(key) {
                Ok(value) => return Ok(value),              // Value or tombstone
                Err(TallyError::KeyNotFound) => continue,   // Not in this SSTable
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    /// Write sorted entries (`None` = tombstone) to a new SSTable
    ///
    /// The new table is placed at the front of the list (newest first).
    pub fn write_sstable<I>(&self, entries: I, max_lsn: u64) -> Result<SSTable>
    where
        I: IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)>,
    {
        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let path = self.sstable_path(id);

        let metadata = Self::build_sstable(&path, max_lsn, entries)?;

        let reader = SSTableReader::open(&path)?;
        self.sstables.write().insert(0, reader);
        self.flushed_lsn.fetch_max(max_lsn, Ordering::SeqCst);

        tracing::debug!(
            path = %path.display(),
            entries = metadata.entry_count,
            max_lsn,
            "Wrote SSTable"
        );

        Ok(metadata)
    }

    /// Merge every table into one, newest version of each key winning
    ///
    /// Tombstones are kept: an old table that survives a failed removal must
    /// not resurrect a deleted key.
    pub fn compact(&self) -> Result<Option<SSTable>> {
        let mut sstables = self.sstables.write();
        if sstables.len() < 2 {
            return Ok(None);
        }

        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        let mut max_lsn = 0;
        for reader in sstables.iter_mut() {
            max_lsn = max_lsn.max(reader.max_lsn());
            for item in reader.iter()? {
                let (key, value) = item?;
                merged.entry(key).or_insert(value);
            }
        }

        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let path = self.sstable_path(id);

        let metadata = Self::build_sstable(&path, max_lsn, merged)?;

        let compacted = SSTableReader::open(&path)?;
        let old = std::mem::replace(&mut *sstables, vec![compacted]);
        drop(sstables);

        let replaced = old.len();
        for reader in old {
            if let Err(e) = fs::remove_file(reader.path()) {
                tracing::warn!(
                    path = %reader.path().display(),
                    error = %e,
                    "Could not remove compacted SSTable"
                );
            }
        }

        tracing::info!(
            dir = %self.data_dir.display(),
            replaced,
            entries = metadata.entry_count,
            "Compacted SSTables"
        );

        Ok(Some(metadata))
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.sstables.read().len()
    }

    /// Highest WAL sequence number persisted in this column family
    pub fn flushed_lsn(&self) -> u64 {
        self.flushed_lsn.load(Ordering::SeqCst)
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next SSTable ID (for testing/debugging)
    pub fn next_sstable_id(&self) -> u64 {
        self.next_sstable_id.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Build a table beside `path` and rename it into place once complete
    ///
    /// A failed build removes its partial file, so only finished tables ever
    /// carry the `.sst` name.
    fn build_sstable<I>(path: &Path, max_lsn: u64, entries: I) -> Result<SSTable>
    where
        I: IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)>,
    {
        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".");
        tmp_path.push(TMP_EXTENSION);
        let tmp_path = PathBuf::from(tmp_path);

        let built = (|| -> Result<SSTable> {
            let mut builder = SSTableBuilder::new(&tmp_path, max_lsn)?;
            for (key, value) in entries {
                match value {
                    Some(v) => builder.add(&key, &v)?,
                    None => builder.add_tombstone(&key)?,
                }
            }
            builder.finish()
        })();

        let mut metadata = match built {
            Ok(metadata) => metadata,
            Err(e) => {
                Self::remove_partial(&tmp_path);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&tmp_path, path) {
            Self::remove_partial(&tmp_path);
            return Err(e.into());
        }
        metadata.path = path.to_path_buf();

        Ok(metadata)
    }

    fn remove_partial(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Could not remove partial SSTable");
            }
        }
    }

    fn sstable_path(&self, id: u64) -> PathBuf {
        Self::sstable_path_with_dir(&self.data_dir, id)
    }

    fn sstable_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("sstable_{:06}.sst", id))
    }

    /// "sstable_000042.sst" → Some(42)
    fn parse_sstable_id(path: &Path) -> Option<u64> {
        if path.extension()? != "sst" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        let id_str = name.strip_prefix("sstable_")?;
        id_str.parse().ok()
    }
}
