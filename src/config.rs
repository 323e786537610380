//! Configuration for TallyKV
//!
//! Centralized configuration with sensible defaults.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::{RetryPolicy, WriteStrategy};
use crate::merge::{MergeOperator, UInt64AddOperator};

/// Name of the column family every engine carries
pub const DEFAULT_COLUMN_FAMILY: &str = "default";

/// Main configuration for a TallyKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files (WAL, SSTables, etc.)
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log            (write-ahead log, shared by all column families)
    ///     └── sstables/{cf}/     (SSTable files, one directory per column family)
    pub data_dir: PathBuf,

    /// Create the data directory when it does not exist
    pub create_if_missing: bool,

    /// Create column family directories that do not exist yet
    pub create_missing_column_families: bool,

    /// Column families to open, with their merge operators
    pub column_families: Vec<ColumnFamilyOptions>,

    /// Compact a column family once it holds more SSTables than this
    pub max_sstables_per_cf: usize,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Counter Configuration
    // -------------------------------------------------------------------------
    /// Column family holding the counter
    pub counter_column_family: String,

    /// Key of the counter inside its column family
    pub counter_key: Vec<u8>,

    /// Column family holding the plain (non-counter) probe value
    pub probe_column_family: String,

    /// How increments reach the engine
    pub write_strategy: WriteStrategy,

    /// Retry policy for transient write failures
    pub retry: RetryPolicy,

    /// Capacity of the single-writer request queue
    pub queue_capacity: usize,

    /// Max requests folded into one batch by the single writer
    pub max_batch_size: usize,

    // -------------------------------------------------------------------------
    // Harness Configuration
    // -------------------------------------------------------------------------
    /// Give up waiting for quiescence after this long
    pub quiescence_timeout: Duration,

    /// Delay between quiescence polls
    pub poll_interval: Duration,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Per-column-family options
#[derive(Clone)]
pub struct ColumnFamilyOptions {
    /// Column family name
    pub name: String,

    /// Merge operator invoked to fold merge operands. `None` rejects merges.
    pub merge_operator: Option<Arc<dyn MergeOperator>>,
}

impl ColumnFamilyOptions {
    /// Column family without a merge operator
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            merge_operator: None,
        }
    }

    /// Register the merge operator for this column family
    pub fn with_merge_operator(mut self, operator: Arc<dyn MergeOperator>) -> Self {
        self.merge_operator = Some(operator);
        self
    }
}

impl fmt::Debug for ColumnFamilyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnFamilyOptions")
            .field("name", &self.name)
            .field(
                "merge_operator",
                &self.merge_operator.as_ref().map(|op| op.name()),
            )
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tallykv_data"),
            create_if_missing: true,
            create_missing_column_families: true,
            column_families: vec![
                ColumnFamilyOptions::new(DEFAULT_COLUMN_FAMILY)
                    .with_merge_operator(Arc::new(UInt64AddOperator)),
                ColumnFamilyOptions::new("probe"),
            ],
            max_sstables_per_cf: 8,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            memtable_size_limit: 64 * 1024 * 1024, // 64 MB
            counter_column_family: DEFAULT_COLUMN_FAMILY.to_string(),
            counter_key: b"hits".to_vec(),
            probe_column_family: "probe".to_string(),
            write_strategy: WriteStrategy::DirectMerge,
            retry: RetryPolicy::default(),
            queue_capacity: 4096,
            max_batch_size: 256,
            quiescence_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Options for a column family by name
    pub fn column_family(&self, name: &str) -> Option<&ColumnFamilyOptions> {
        self.column_families.iter().find(|cf| cf.name == name)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.config.create_if_missing = create;
        self
    }

    pub fn create_missing_column_families(mut self, create: bool) -> Self {
        self.config.create_missing_column_families = create;
        self
    }

    /// Replace the column family list
    pub fn column_families(mut self, column_families: Vec<ColumnFamilyOptions>) -> Self {
        self.config.column_families = column_families;
        self
    }

    /// Add or replace a single column family
    pub fn column_family(mut self, options: ColumnFamilyOptions) -> Self {
        self.config.column_families.retain(|cf| cf.name != options.name);
        self.config.column_families.push(options);
        self
    }

    pub fn max_sstables_per_cf(mut self, count: usize) -> Self {
        self.config.max_sstables_per_cf = count;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    pub fn counter_column_family(mut self, name: impl Into<String>) -> Self {
        self.config.counter_column_family = name.into();
        self
    }

    pub fn counter_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.config.counter_key = key.into();
        self
    }

    pub fn probe_column_family(mut self, name: impl Into<String>) -> Self {
        self.config.probe_column_family = name.into();
        self
    }

    /// Set how increments reach the engine
    pub fn write_strategy(mut self, strategy: WriteStrategy) -> Self {
        self.config.write_strategy = strategy;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size;
        self
    }

    pub fn quiescence_timeout(mut self, timeout: Duration) -> Self {
        self.config.quiescence_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
