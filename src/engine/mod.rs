//! Engine Module
//!
//! The embedded storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Open column families with their merge operators
//! - Coordinate WAL, MemTable, and per-column-family Storage
//! - Apply single writes and atomic write batches
//! - Fold merge operands on read and on flush
//! - Trigger flushes when MemTable is full, compaction when tables pile up
//! - Manage crash recovery on startup

mod batch;
mod column_family;
mod traits;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::{Config, DEFAULT_COLUMN_FAMILY};
use crate::error::{Result, TallyError};
use crate::memtable::{MemTable, MemTableEntry, MemTableOp, MergeBase};
use crate::merge::MergeOperator;
use crate::storage::StorageManager;
use crate::wal::{Operation, WalRecovery, WalWriter};

pub use batch::{BatchOp, WriteBatch};
pub use column_family::ColumnFamilyHandle;
pub use traits::StorageEngine;

/// An open column family
struct ColumnFamily {
    handle: ColumnFamilyHandle,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    storage: StorageManager,
}

impl ColumnFamily {
    fn operator(&self) -> Result<&dyn MergeOperator> {
        self.merge_operator
            .as_deref()
            .ok_or_else(|| TallyError::MergeOperatorMissing(self.handle.name().to_string()))
    }
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/merge/delete/write/flush): Serialized by `write_lock`
///   - Only ONE write operation at a time
///   - Must acquire: write_lock → WAL → memtable → storage (write)
///   - A write either returns `Ok` with its effects visible, or fails
///     with nothing applied
///
/// - **Reads** (get): Concurrent, holding `state` shared
///   - Flush and compaction hold `state` exclusively, so a read never sees
///     operands both in the memtable and already folded into a new SSTable
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Open column families, indexed by handle id
    column_families: Vec<ColumnFamily>,

    /// Write-ahead log for durability (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// In-memory table for recent writes (internal RwLock)
    memtable: MemTable,

    /// Serializes write operations
    write_lock: Mutex<()>,

    /// Shared by readers, exclusive for flush/compaction
    state: RwLock<()>,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const SSTABLE_DIR: &'static str = "sstables";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Reconcile requested column families with those on disk
    /// 3. Load existing SSTables per column family
    /// 4. Replay the WAL past each family's persisted LSN, then flush
    /// 5. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        // Step 1: Data directory
        if !config.data_dir.exists() {
            if !config.create_if_missing {
                return Err(TallyError::EngineOpen(format!(
                    "data directory {} does not exist and create_if_missing is off",
                    config.data_dir.display()
                )));
            }
            fs::create_dir_all(&config.data_dir)?;
        }

        let sstable_root = config.data_dir.join(Self::SSTABLE_DIR);
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        fs::create_dir_all(&sstable_root)?;

        // Step 2: Column families
        let requested = Self::requested_column_families(&config)?;
        let on_disk = Self::existing_column_families(&sstable_root)?;

        if let Some(orphan) = on_disk.iter().find(|name| !requested.iter().any(|cf| &cf.0 == *name)) {
            return Err(TallyError::EngineOpen(format!(
                "column family '{}' exists on disk but was not requested",
                orphan
            )));
        }

        // Step 3: Storage per column family
        let mut column_families = Vec::with_capacity(requested.len());
        for (id, (name, merge_operator)) in requested.into_iter().enumerate() {
            let dir = sstable_root.join(&name);
            if !dir.exists() && !config.create_missing_column_families {
                return Err(TallyError::EngineOpen(format!(
                    "column family '{}' does not exist and create_missing_column_families is off",
                    name
                )));
            }

            let storage = StorageManager::open(&dir)?;
            tracing::debug!(
                cf = %name,
                merge_operator = merge_operator.as_ref().map(|op| op.name()),
                sstables = storage.sstable_count(),
                "Opened column family"
            );

            column_families.push(ColumnFamily {
                handle: ColumnFamilyHandle::new(id as u32, &name),
                merge_operator,
                storage,
            });
        }

        // Step 4: Replay WAL
        let memtable = MemTable::new();
        let mut replayed_entries = 0u64;
        let mut skipped_ops = 0u64;
        let mut last_lsn = column_families
            .iter()
            .map(|cf| cf.storage.flushed_lsn())
            .max()
            .unwrap_or(0);

        if wal_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&wal_path)?;

            if recovery.entries_recovered > 0 || recovery.entries_corrupted > 0 {
                tracing::info!(
                    recovered = recovery.entries_recovered,
                    corrupted = recovery.entries_corrupted,
                    last_lsn = recovery.last_lsn,
                    "WAL recovery"
                );
            }

            for entry in entries {
                replayed_entries += 1;
                last_lsn = last_lsn.max(entry.lsn);

                let mut ops = Vec::with_capacity(entry.operations.len());
                for op in entry.operations {
                    let family = column_families
                        .iter()
                        .find(|cf| cf.handle.name() == op.column_family())
                        .ok_or_else(|| {
                            TallyError::EngineOpen(format!(
                                "WAL entry {} references unknown column family '{}'",
                                entry.lsn,
                                op.column_family()
                            ))
                        })?;

                    // Already folded into an SSTable before the crash
                    if entry.lsn <= family.storage.flushed_lsn() {
                        skipped_ops += 1;
                        continue;
                    }

                    ops.push(Self::to_memtable_op(family.handle.id(), op));
                }
                memtable.apply(ops);
            }
        }

        let wal = WalWriter::open_with_lsn(&wal_path, config.wal_sync_strategy, last_lsn + 1)?;

        let engine = Self {
            config,
            column_families,
            wal: Mutex::new(wal),
            memtable,
            write_lock: Mutex::new(()),
            state: RwLock::new(()),
        };

        // Make recovered data durable in SSTables, then drop the replayed log
        if replayed_entries > 0 {
            tracing::info!(
                entries = replayed_entries,
                skipped_ops,
                memtable_entries = engine.memtable.entry_count(),
                "Flushing recovered entries to SSTables"
            );
            {
                let _write_guard = engine.write_lock.lock();
                engine.flush_locked()?;
            }
        }

        tracing::info!(
            data_dir = %engine.config.data_dir.display(),
            column_families = engine.column_families.len(),
            next_lsn = engine.wal.lock().current_lsn(),
            "Engine opened"
        );

        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Requested column families, `default` first, validated and deduplicated
    fn requested_column_families(
        config: &Config,
    ) -> Result<Vec<(String, Option<Arc<dyn MergeOperator>>)>> {
        let mut requested: Vec<(String, Option<Arc<dyn MergeOperator>>)> = Vec::new();
        if config.column_family(DEFAULT_COLUMN_FAMILY).is_none() {
            requested.push((DEFAULT_COLUMN_FAMILY.to_string(), None));
        }

        let mut seen = HashSet::new();
        for cf in &config.column_families {
            if !column_family::is_valid_name(&cf.name) {
                return Err(TallyError::EngineOpen(format!(
                    "invalid column family name '{}'",
                    cf.name
                )));
            }
            if !seen.insert(cf.name.as_str()) {
                return Err(TallyError::EngineOpen(format!(
                    "column family '{}' requested twice",
                    cf.name
                )));
            }
            requested.push((cf.name.clone(), cf.merge_operator.clone()));
        }

        Ok(requested)
    }

    fn existing_column_families(sstable_root: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(sstable_root)? {
            let path = entry?.path();
            if path.is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    fn to_memtable_op(cf: u32, op: Operation) -> MemTableOp {
        match op {
            Operation::Put { key, value, .. } => MemTableOp::Put { cf, key, value },
            Operation::Merge { key, operand, .. } => MemTableOp::Merge { cf, key, operand },
            Operation::Delete { key, .. } => MemTableOp::Delete { cf, key },
        }
    }

    // =========================================================================
    // Column Families
    // =========================================================================

    /// Look up an open column family by name
    pub fn cf_handle(&self, name: &str) -> Option<ColumnFamilyHandle> {
        self.column_families
            .iter()
            .find(|cf| cf.handle.name() == name)
            .map(|cf| cf.handle.clone())
    }

    /// Like [`Engine::cf_handle`], but an unknown name is an error
    pub fn column_family(&self, name: &str) -> Result<ColumnFamilyHandle> {
        self.cf_handle(name)
            .ok_or_else(|| TallyError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Names of all open column families
    pub fn column_family_names(&self) -> Vec<String> {
        self.column_families
            .iter()
            .map(|cf| cf.handle.name().to_string())
            .collect()
    }

    /// Resolve a handle, rejecting handles issued by another engine
    fn family(&self, handle: &ColumnFamilyHandle) -> Result<&ColumnFamily> {
        self.column_families
            .get(handle.id() as usize)
            .filter(|cf| cf.handle == *handle)
            .ok_or_else(|| TallyError::ColumnFamilyNotFound(handle.name().to_string()))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value by key
    ///
    /// Search order:
    /// 1. MemTable (most recent writes); queued merge operands are folded
    ///    onto their base without writing the result back
    /// 2. SSTables (newest to oldest)
    pub fn get(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let family = self.family(cf)?;
        let _state = self.state.read();

        match self.memtable.get(cf.id(), key) {
            Some(MemTableEntry::Value(value)) => Ok(Some(value)),
            Some(MemTableEntry::Tombstone) => Ok(None),
            Some(MemTableEntry::Merge { base, operands }) => {
                self.fold(family, key, base, &operands).map(Some)
            }
            None => family.storage.get(key),
        }
    }

    /// Fold operands onto their base through the family's merge operator
    fn fold(
        &self,
        family: &ColumnFamily,
        key: &[u8],
        base: MergeBase,
        operands: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let operator = family.operator()?;
        let base = match base {
            MergeBase::Value(value) => Some(value),
            MergeBase::Absent => None,
            MergeBase::Pending => family.storage.get(key)?,
        };
        operator.full_merge(key, base.as_deref(), operands)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Put a key-value pair
    pub fn put(&self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_ops(vec![BatchOp::Put {
            cf: cf.clone(),
            key: key.to_vec(),
            value: value.to_vec(),
        }])
    }

    /// Queue a merge operand for a key
    ///
    /// Fails with `MergeOperatorMissing` if the column family was opened
    /// without a merge operator.
    pub fn merge(&self, cf: &ColumnFamilyHandle, key: &[u8], operand: &[u8]) -> Result<()> {
        self.write_ops(vec![BatchOp::Merge {
            cf: cf.clone(),
            key: key.to_vec(),
            operand: operand.to_vec(),
        }])
    }

    /// Delete a key
    pub fn delete(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<()> {
        self.write_ops(vec![BatchOp::Delete {
            cf: cf.clone(),
            key: key.to_vec(),
        }])
    }

    /// Apply a batch atomically
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.write_ops(batch.into_ops())
    }

    /// Steps:
    /// 1. Validate every operation (nothing is logged if one is invalid)
    /// 2. Acquire write lock
    /// 3. Flush first if the memtable is full
    /// 4. Append one WAL entry for all operations
    /// 5. Apply all operations to the MemTable under one lock
    fn write_ops(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut wal_ops = Vec::with_capacity(ops.len());
        let mut mem_ops = Vec::with_capacity(ops.len());

        for op in ops {
            let family = self.family(op.column_family())?;
            let cf_name = family.handle.name().to_string();
            let cf_id = family.handle.id();

            match op {
                BatchOp::Put { key, value, .. } => {
                    wal_ops.push(Operation::Put { cf: cf_name, key: key.clone(), value: value.clone() });
                    mem_ops.push(MemTableOp::Put { cf: cf_id, key, value });
                }
                BatchOp::Merge { key, operand, .. } => {
                    family.operator()?;
                    wal_ops.push(Operation::Merge { cf: cf_name, key: key.clone(), operand: operand.clone() });
                    mem_ops.push(MemTableOp::Merge { cf: cf_id, key, operand });
                }
                BatchOp::Delete { key, .. } => {
                    wal_ops.push(Operation::Delete { cf: cf_name, key: key.clone() });
                    mem_ops.push(MemTableOp::Delete { cf: cf_id, key });
                }
            }
        }

        let _write_guard = self.write_lock.lock();

        if self.memtable.should_flush(self.config.memtable_size_limit) {
            self.flush_locked()?;
        }

        let lsn = self.wal.lock().append_batch(wal_ops)?;
        let size = self.memtable.apply(mem_ops);
        tracing::trace!(lsn, memtable_size = size, "Write applied");

        Ok(())
    }

    // =========================================================================
    // Flush & Compaction
    // =========================================================================

    /// Flush memtable to disk (public API)
    ///
    /// Forces a flush regardless of memtable size
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.flush_locked()
    }

    /// Internal flush implementation (called with write lock held)
    ///
    /// Each column family is folded into one new SSTable stamped with the
    /// last WAL sequence number, and its memtable entries are dropped right
    /// away: a failure halfway leaves only unflushed families in memory.
    fn flush_locked(&self) -> Result<()> {
        let _state = self.state.write();
        let max_lsn = self.wal.lock().last_lsn();

        for id in self.memtable.column_families() {
            let family = &self.column_families[id as usize];
            let entries = self.memtable.entries(id);

            let mut folded = Vec::with_capacity(entries.len());
            for (key, entry) in entries {
                let value = match entry {
                    MemTableEntry::Value(value) => Some(value),
                    MemTableEntry::Tombstone => None,
                    MemTableEntry::Merge { base, operands } => {
                        Some(self.fold(family, &key, base, &operands)?)
                    }
                };
                folded.push((key, value));
            }

            let table = family.storage.write_sstable(folded, max_lsn)?;
            self.memtable.clear_column_family(id);

            tracing::info!(
                cf = family.handle.name(),
                entries = table.entry_count,
                max_lsn,
                "Flushed memtable"
            );
        }

        self.wal.lock().truncate()?;

        for family in &self.column_families {
            if family.storage.sstable_count() > self.config.max_sstables_per_cf {
                // Tables stay readable when this fails; the next flush retries
                if let Err(e) = family.storage.compact() {
                    tracing::error!(cf = family.handle.name(), error = %e, "Compaction failed");
                }
            }
        }

        Ok(())
    }

    /// Compact one column family's SSTables into a single table
    pub fn compact(&self, cf: &ColumnFamilyHandle) -> Result<()> {
        let family = self.family(cf)?;
        let _write_guard = self.write_lock.lock();
        let _state = self.state.write();
        family.storage.compact()?;
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Flushes any pending data and syncs to disk
    pub fn close(self) -> Result<()> {
        if !self.memtable.is_empty() {
            self.flush()?;
        }

        self.wal.lock().sync()?;
        tracing::info!(data_dir = %self.config.data_dir.display(), "Engine closed");

        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Directory holding one column family's SSTables
    pub fn storage_dir(&self, cf: &ColumnFamilyHandle) -> Result<PathBuf> {
        Ok(self.family(cf)?.storage.data_dir().to_path_buf())
    }

    /// Get the current memtable size
    pub fn memtable_size(&self) -> usize {
        self.memtable.size()
    }

    /// Get the memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.entry_count()
    }

    /// Get the number of SSTables of a column family
    pub fn sstable_count(&self, cf: &ColumnFamilyHandle) -> Result<usize> {
        Ok(self.family(cf)?.storage.sstable_count())
    }

    /// LSN of the most recent write
    pub fn last_lsn(&self) -> u64 {
        self.wal.lock().last_lsn()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
