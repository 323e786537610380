//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put/delete per column family
//! - Merge folding on read, across flushes, and without an operator
//! - Atomic write batches
//! - Crash recovery from the WAL, including LSN skipping and torn batches
//! - Column family open rules
//! - Flush triggers, compaction and concurrent writers

use std::fs::{self, OpenOptions};
use std::sync::Arc;
use std::thread;

use tallykv::adapter::codec::{decode, encode};
use tallykv::config::{ColumnFamilyOptions, Config, WalSyncStrategy};
use tallykv::engine::{Engine, StorageEngine, WriteBatch};
use tallykv::merge::UInt64AddOperator;
use tallykv::TallyError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(temp_dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite) // Sync every write for test reliability
        .memtable_size_limit(1024 * 1024) // 1 MB
        .build()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    (temp_dir, engine)
}

fn read_u64(engine: &Engine, cf: &str, key: &[u8]) -> Option<u64> {
    let cf = engine.column_family(cf).unwrap();
    engine.get(&cf, key).unwrap().map(|bytes| decode(&bytes).unwrap())
}

fn merge_n(engine: &Engine, key: &[u8], n: u64) {
    let cf = engine.column_family("default").unwrap();
    for _ in 0..n {
        engine.merge(&cf, key, &encode(1)).unwrap();
    }
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_layout() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let config = Config::builder().data_dir(&data_dir).build();
    let engine = Engine::open(config).unwrap();

    assert!(data_dir.join("wal.log").exists());
    assert!(data_dir.join("sstables").join("default").is_dir());
    assert!(data_dir.join("sstables").join("probe").is_dir());
    assert_eq!(engine.column_family_names(), vec!["default", "probe"]);
}

#[test]
fn test_engine_put_get_delete() {
    let (_temp, engine) = setup_temp_engine();
    let cf = engine.column_family("probe").unwrap();

    engine.put(&cf, b"hello", b"world").unwrap();
    assert_eq!(engine.get(&cf, b"hello").unwrap(), Some(b"world".to_vec()));

    engine.delete(&cf, b"hello").unwrap();
    assert_eq!(engine.get(&cf, b"hello").unwrap(), None);
    assert_eq!(engine.get(&cf, b"never").unwrap(), None);
}

#[test]
fn test_column_families_are_isolated() {
    let (_temp, engine) = setup_temp_engine();
    let default = engine.column_family("default").unwrap();
    let probe = engine.column_family("probe").unwrap();

    engine.put(&default, b"key", b"d").unwrap();
    engine.put(&probe, b"key", b"p").unwrap();

    assert_eq!(engine.get(&default, b"key").unwrap(), Some(b"d".to_vec()));
    assert_eq!(engine.get(&probe, b"key").unwrap(), Some(b"p".to_vec()));
}

#[test]
fn test_unknown_column_family() {
    let (_temp, engine) = setup_temp_engine();

    assert!(engine.cf_handle("missing").is_none());
    assert!(matches!(
        engine.column_family("missing"),
        Err(TallyError::ColumnFamilyNotFound(_))
    ));
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_merge_accumulates_from_missing_key() {
    let (_temp, engine) = setup_temp_engine();

    merge_n(&engine, b"hits", 10);

    assert_eq!(read_u64(&engine, "default", b"hits"), Some(10));
}

#[test]
fn test_merge_onto_put_base() {
    let (_temp, engine) = setup_temp_engine();
    let cf = engine.column_family("default").unwrap();

    engine.put(&cf, b"hits", &encode(5)).unwrap();
    merge_n(&engine, b"hits", 3);

    assert_eq!(read_u64(&engine, "default", b"hits"), Some(8));
}

#[test]
fn test_merge_after_delete_starts_from_zero() {
    let (_temp, engine) = setup_temp_engine();
    let cf = engine.column_family("default").unwrap();

    merge_n(&engine, b"hits", 4);
    engine.flush().unwrap();
    engine.delete(&cf, b"hits").unwrap();
    merge_n(&engine, b"hits", 2);

    assert_eq!(read_u64(&engine, "default", b"hits"), Some(2));
}

#[test]
fn test_merge_folds_across_flushes() {
    let (_temp, engine) = setup_temp_engine();

    merge_n(&engine, b"hits", 7);
    engine.flush().unwrap();
    assert_eq!(engine.memtable_entry_count(), 0);

    merge_n(&engine, b"hits", 5);
    assert_eq!(read_u64(&engine, "default", b"hits"), Some(12));

    engine.flush().unwrap();
    assert_eq!(read_u64(&engine, "default", b"hits"), Some(12));
}

#[test]
fn test_merge_without_operator_is_rejected() {
    let (_temp, engine) = setup_temp_engine();
    let probe = engine.column_family("probe").unwrap();
    let before = engine.last_lsn();

    let result = engine.merge(&probe, b"hits", &encode(1));

    assert!(matches!(result, Err(TallyError::MergeOperatorMissing(name)) if name == "probe"));
    assert_eq!(engine.last_lsn(), before);
    assert_eq!(engine.get(&probe, b"hits").unwrap(), None);
}

#[test]
fn test_malformed_operand_fails_read() {
    let (_temp, engine) = setup_temp_engine();
    let cf = engine.column_family("default").unwrap();

    engine.merge(&cf, b"hits", b"abc").unwrap();

    assert!(matches!(engine.get(&cf, b"hits"), Err(TallyError::MergeFailed(_))));
}

// =============================================================================
// Write Batch Tests
// =============================================================================

#[test]
fn test_batch_of_k_merges_adds_k() {
    let (_temp, engine) = setup_temp_engine();
    let cf = engine.column_family("default").unwrap();

    let mut batch = WriteBatch::new();
    for _ in 0..5 {
        batch.merge(&cf, b"hits", &encode(1));
    }
    let before = engine.last_lsn();
    engine.write(batch).unwrap();

    assert_eq!(read_u64(&engine, "default", b"hits"), Some(5));
    // One WAL entry for the whole batch
    assert_eq!(engine.last_lsn(), before + 1);
}

#[test]
fn test_invalid_batch_applies_nothing() {
    let (_temp, engine) = setup_temp_engine();
    let default = engine.column_family("default").unwrap();
    let probe = engine.column_family("probe").unwrap();

    let mut batch = WriteBatch::new();
    batch
        .merge(&default, b"hits", &encode(1))
        .put(&probe, b"key", b"value")
        .merge(&probe, b"hits", &encode(1));

    let result = engine.write(batch);

    assert!(matches!(result, Err(TallyError::MergeOperatorMissing(_))));
    assert_eq!(read_u64(&engine, "default", b"hits"), None);
    assert_eq!(engine.get(&probe, b"key").unwrap(), None);
    assert_eq!(engine.memtable_entry_count(), 0);
}

#[test]
fn test_empty_batch_is_noop() {
    let (_temp, engine) = setup_temp_engine();
    let before = engine.last_lsn();

    engine.write(WriteBatch::new()).unwrap();

    assert_eq!(engine.last_lsn(), before);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_recovery_replays_unflushed_writes() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        merge_n(&engine, b"hits", 6);
        let probe = engine.column_family("probe").unwrap();
        engine.put(&probe, b"k", b"v").unwrap();
        // Dropped without close: memtable is lost, WAL survives
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();

    assert_eq!(read_u64(&engine, "default", b"hits"), Some(6));
    let probe = engine.column_family("probe").unwrap();
    assert_eq!(engine.get(&probe, b"k").unwrap(), Some(b"v".to_vec()));
    // Recovered data was flushed and the log emptied
    assert_eq!(engine.memtable_entry_count(), 0);
    assert_eq!(fs::metadata(temp_dir.path().join("wal.log")).unwrap().len(), 0);
}

#[test]
fn test_recovery_skips_already_flushed_operations() {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("wal.log");
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        merge_n(&engine, b"hits", 3);
        let stale_wal = fs::read(&wal_path).unwrap();

        engine.flush().unwrap();

        // Crash between the SSTable write and the WAL truncation
        fs::write(&wal_path, stale_wal).unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();

    assert_eq!(read_u64(&engine, "default", b"hits"), Some(3));
}

#[test]
fn test_recovery_drops_torn_batch() {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("wal.log");
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        let cf = engine.column_family("default").unwrap();
        merge_n(&engine, b"hits", 2);

        let mut batch = WriteBatch::new();
        for _ in 0..4 {
            batch.merge(&cf, b"hits", &encode(1));
        }
        engine.write(batch).unwrap();
    }

    let len = fs::metadata(&wal_path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
    file.set_len(len - 3).unwrap();
    drop(file);

    let engine = Engine::open(config_for(&temp_dir)).unwrap();

    assert_eq!(read_u64(&engine, "default", b"hits"), Some(2));
}

#[test]
fn test_lsns_continue_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let last = {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        merge_n(&engine, b"hits", 4);
        engine.flush().unwrap();
        merge_n(&engine, b"hits", 1);
        let last = engine.last_lsn();
        engine.close().unwrap();
        last
    };

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert!(engine.last_lsn() >= last);

    merge_n(&engine, b"hits", 1);
    assert!(engine.last_lsn() > last);
    assert_eq!(read_u64(&engine, "default", b"hits"), Some(6));
}

#[test]
fn test_close_persists_everything() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        merge_n(&engine, b"hits", 9);
        engine.close().unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    let cf = engine.column_family("default").unwrap();

    assert_eq!(engine.sstable_count(&cf).unwrap(), 1);
    assert_eq!(read_u64(&engine, "default", b"hits"), Some(9));
}

// =============================================================================
// Column Family Open Rules
// =============================================================================

#[test]
fn test_missing_directory_without_create_if_missing() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path().join("absent"))
        .create_if_missing(false)
        .build();

    assert!(matches!(Engine::open(config), Err(TallyError::EngineOpen(_))));
}

#[test]
fn test_new_column_family_without_create_missing() {
    let temp_dir = TempDir::new().unwrap();
    Engine::open(config_for(&temp_dir)).unwrap().close().unwrap();

    let strict = Config::builder()
        .data_dir(temp_dir.path())
        .create_missing_column_families(false)
        .column_family(ColumnFamilyOptions::new("extra"))
        .build();
    assert!(matches!(Engine::open(strict), Err(TallyError::EngineOpen(_))));

    // Existing families open fine without the flag
    let existing = Config::builder()
        .data_dir(temp_dir.path())
        .create_missing_column_families(false)
        .build();
    assert!(Engine::open(existing).is_ok());
}

#[test]
fn test_unrequested_column_family_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let with_extra = Config::builder()
        .data_dir(temp_dir.path())
        .column_family(ColumnFamilyOptions::new("extra"))
        .build();
    Engine::open(with_extra).unwrap().close().unwrap();

    let without = Config::builder().data_dir(temp_dir.path()).build();
    assert!(matches!(Engine::open(without), Err(TallyError::EngineOpen(_))));
}

#[test]
fn test_invalid_and_duplicate_column_family_names() {
    let temp_dir = TempDir::new().unwrap();

    let invalid = Config::builder()
        .data_dir(temp_dir.path())
        .column_family(ColumnFamilyOptions::new("../escape"))
        .build();
    assert!(matches!(Engine::open(invalid), Err(TallyError::EngineOpen(_))));

    let duplicate = Config::builder()
        .data_dir(temp_dir.path())
        .column_families(vec![
            ColumnFamilyOptions::new("default"),
            ColumnFamilyOptions::new("default"),
        ])
        .build();
    assert!(matches!(Engine::open(duplicate), Err(TallyError::EngineOpen(_))));
}

#[test]
fn test_default_family_always_opened() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .column_families(vec![ColumnFamilyOptions::new("counters")
            .with_merge_operator(Arc::new(UInt64AddOperator))])
        .build();

    let engine = Engine::open(config).unwrap();

    assert_eq!(engine.column_family_names(), vec!["default", "counters"]);
    let default = engine.column_family("default").unwrap();
    assert!(matches!(
        engine.merge(&default, b"k", &encode(1)),
        Err(TallyError::MergeOperatorMissing(_))
    ));
}

// =============================================================================
// Flush & Compaction Tests
// =============================================================================

#[test]
fn test_small_memtable_triggers_flush() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 10_000 })
        .memtable_size_limit(100) // Very small to trigger flushes
        .max_sstables_per_cf(1_000)
        .build();
    let engine = Engine::open(config).unwrap();
    let cf = engine.column_family("default").unwrap();

    merge_n(&engine, b"hits", 200);

    assert!(engine.sstable_count(&cf).unwrap() > 1);
    assert_eq!(read_u64(&engine, "default", b"hits"), Some(200));
}

#[test]
fn test_auto_compaction_bounds_table_count() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 10_000 })
        .max_sstables_per_cf(2)
        .build();
    let engine = Engine::open(config).unwrap();
    let cf = engine.column_family("default").unwrap();

    for _ in 0..10 {
        merge_n(&engine, b"hits", 3);
        engine.flush().unwrap();
        assert!(engine.sstable_count(&cf).unwrap() <= 2);
    }

    assert_eq!(read_u64(&engine, "default", b"hits"), Some(30));
}

#[test]
fn test_manual_compaction() {
    let (_temp, engine) = setup_temp_engine();
    let cf = engine.column_family("default").unwrap();

    for i in 0..4u64 {
        engine.put(&cf, format!("key{}", i).as_bytes(), &encode(i)).unwrap();
        merge_n(&engine, b"hits", 1);
        engine.flush().unwrap();
    }
    engine.delete(&cf, b"key0").unwrap();
    engine.flush().unwrap();

    engine.compact(&cf).unwrap();

    assert_eq!(engine.sstable_count(&cf).unwrap(), 1);
    assert_eq!(engine.get(&cf, b"key0").unwrap(), None);
    assert_eq!(read_u64(&engine, "default", b"key3"), Some(3));
    assert_eq!(read_u64(&engine, "default", b"hits"), Some(4));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_merges_are_exact() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 10_000 })
        .memtable_size_limit(4 * 1024) // Flushes race with writers and readers
        .build();
    let engine = Arc::new(Engine::open(config).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let cf = engine.column_family("default").unwrap();
                for _ in 0..500 {
                    engine.merge(&cf, b"hits", &encode(1)).unwrap();
                    engine.get(&cf, b"hits").unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(read_u64(&engine, "default", b"hits"), Some(4000));
}

#[test]
fn test_engine_as_trait_object() {
    let (_temp, engine) = setup_temp_engine();
    let engine: Arc<dyn StorageEngine> = Arc::new(engine);

    let cf = engine.cf_handle("default").unwrap();
    engine.merge(&cf, b"hits", &encode(2)).unwrap();
    engine.merge(&cf, b"hits", &encode(3)).unwrap();

    assert_eq!(engine.get(&cf, b"hits").unwrap(), Some(encode(5).to_vec()));
}
