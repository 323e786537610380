//! Tests for SSTables and the StorageManager
//!
//! These tests verify:
//! - SSTable creation, lookups and tombstones
//! - The persisted max LSN
//! - Ordered-key enforcement and format validation
//! - StorageManager newest-first reads, reopen and compaction

use std::fs;
use std::path::{Path, PathBuf};

use tallykv::storage::{SSTable, SSTableBuilder, SSTableReader, StorageManager};
use tallykv::TallyError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_sstable() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.sst");
    (temp_dir, path)
}

/// Create an SSTable with numbered entries
fn create_sstable_with_entries(path: &Path, count: usize) -> SSTable {
    let mut builder = SSTableBuilder::new(path, 0).unwrap();
    for i in 0..count {
        let key = format!("key{:05}", i); // Zero-padded for lexicographic order
        let value = format!("value{}", i);
        builder.add(key.as_bytes(), value.as_bytes()).unwrap();
    }
    builder.finish().unwrap()
}

fn entries(pairs: &[(&str, Option<&str>)]) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
    pairs
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.map(|v| v.as_bytes().to_vec())))
        .collect()
}

// =============================================================================
// SSTableBuilder Tests
// =============================================================================

#[test]
fn test_builder_creates_file() {
    let (_temp, path) = setup_temp_sstable();

    let sstable = create_sstable_with_entries(&path, 5);

    assert!(path.exists());
    assert_eq!(sstable.entry_count(), 5);
    assert_eq!(sstable.file_size, fs::metadata(&path).unwrap().len());
}

#[test]
fn test_builder_tracks_min_max_keys() {
    let (_temp, path) = setup_temp_sstable();

    let mut builder = SSTableBuilder::new(&path, 0).unwrap();
    builder.add(b"apple", b"1").unwrap();
    builder.add(b"banana", b"2").unwrap();
    builder.add(b"cherry", b"3").unwrap();
    let sstable = builder.finish().unwrap();

    assert_eq!(sstable.min_key, b"apple");
    assert_eq!(sstable.max_key, b"cherry");
    assert!(sstable.might_contain(b"blueberry"));
    assert!(!sstable.might_contain(b"zucchini"));
}

#[test]
fn test_builder_rejects_out_of_order_keys() {
    let (_temp, path) = setup_temp_sstable();

    let mut builder = SSTableBuilder::new(&path, 0).unwrap();
    builder.add(b"b", b"1").unwrap();

    assert!(matches!(builder.add(b"a", b"2"), Err(TallyError::Storage(_))));
    assert!(matches!(builder.add_tombstone(b"b"), Err(TallyError::Storage(_))));
}

#[test]
fn test_builder_persists_max_lsn() {
    let (_temp, path) = setup_temp_sstable();

    let mut builder = SSTableBuilder::new(&path, 1234).unwrap();
    builder.add(b"k", b"v").unwrap();
    let sstable = builder.finish().unwrap();

    assert_eq!(sstable.max_lsn, 1234);
    assert_eq!(SSTableReader::open(&path).unwrap().max_lsn(), 1234);
}

// =============================================================================
// SSTableReader Tests
// =============================================================================

#[test]
fn test_reader_lookups() {
    let (_temp, path) = setup_temp_sstable();
    create_sstable_with_entries(&path, 100);

    let mut reader = SSTableReader::open(&path).unwrap();

    assert_eq!(reader.entry_count(), 100);
    assert_eq!(reader.get(b"key00042").unwrap(), Some(b"value42".to_vec()));
    assert!(matches!(reader.get(b"key99999"), Err(TallyError::KeyNotFound)));
}

#[test]
fn test_reader_tombstone_is_none() {
    let (_temp, path) = setup_temp_sstable();

    let mut builder = SSTableBuilder::new(&path, 0).unwrap();
    builder.add(b"key1", b"value1").unwrap();
    builder.add_tombstone(b"key2").unwrap();
    builder.finish().unwrap();

    let mut reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.get(b"key2").unwrap(), None);
}

#[test]
fn test_reader_iterates_in_order() {
    let (_temp, path) = setup_temp_sstable();

    let mut builder = SSTableBuilder::new(&path, 0).unwrap();
    builder.add(b"a", b"1").unwrap();
    builder.add_tombstone(b"b").unwrap();
    builder.add(b"c", b"3").unwrap();
    builder.finish().unwrap();

    let mut reader = SSTableReader::open(&path).unwrap();
    let items: Vec<_> = reader.iter().unwrap().map(|item| item.unwrap()).collect();

    assert_eq!(
        items,
        vec![
            (b"a".to_vec(), Some(b"1".to_vec())),
            (b"b".to_vec(), None),
            (b"c".to_vec(), Some(b"3".to_vec())),
        ]
    );
}

#[test]
fn test_reader_empty_sstable() {
    let (_temp, path) = setup_temp_sstable();
    SSTableBuilder::new(&path, 0).unwrap().finish().unwrap();

    let mut reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.entry_count(), 0);
    assert!(!reader.might_contain(b"anything"));
    assert_eq!(reader.iter().unwrap().count(), 0);
}

#[test]
fn test_reader_rejects_bad_magic() {
    let (_temp, path) = setup_temp_sstable();
    create_sstable_with_entries(&path, 3);

    let mut bytes = fs::read(&path).unwrap();
    bytes[0..4].copy_from_slice(b"NOPE");
    fs::write(&path, bytes).unwrap();

    assert!(matches!(SSTableReader::open(&path), Err(TallyError::Storage(_))));
}

#[test]
fn test_reader_rejects_truncated_file() {
    let (_temp, path) = setup_temp_sstable();
    fs::write(&path, b"TLKV").unwrap();

    assert!(matches!(SSTableReader::open(&path), Err(TallyError::Storage(_))));
}

// =============================================================================
// StorageManager Tests
// =============================================================================

#[test]
fn test_manager_open_empty_directory() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("cf");

    let manager = StorageManager::open(&path).unwrap();

    assert!(path.is_dir());
    assert_eq!(manager.sstable_count(), 0);
    assert_eq!(manager.next_sstable_id(), 1);
    assert_eq!(manager.flushed_lsn(), 0);
}

#[test]
fn test_manager_newest_table_wins() {
    let temp = TempDir::new().unwrap();
    let manager = StorageManager::open(temp.path()).unwrap();

    manager
        .write_sstable(entries(&[("a", Some("old")), ("b", Some("kept"))]), 3)
        .unwrap();
    manager
        .write_sstable(entries(&[("a", Some("new")), ("c", None)]), 7)
        .unwrap();

    assert_eq!(manager.get(b"a").unwrap(), Some(b"new".to_vec()));
    assert_eq!(manager.get(b"b").unwrap(), Some(b"kept".to_vec()));
    assert_eq!(manager.get(b"c").unwrap(), None);
    assert_eq!(manager.get(b"zzz").unwrap(), None);
    assert_eq!(manager.flushed_lsn(), 7);
}

#[test]
fn test_manager_reopen_rediscovers_tables() {
    let temp = TempDir::new().unwrap();
    {
        let manager = StorageManager::open(temp.path()).unwrap();
        manager.write_sstable(entries(&[("a", Some("1"))]), 4).unwrap();
        manager.write_sstable(entries(&[("a", Some("2"))]), 9).unwrap();
    }

    let manager = StorageManager::open(temp.path()).unwrap();

    assert_eq!(manager.sstable_count(), 2);
    assert_eq!(manager.next_sstable_id(), 3);
    assert_eq!(manager.flushed_lsn(), 9);
    assert_eq!(manager.get(b"a").unwrap(), Some(b"2".to_vec()));
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_manager_written_table_has_final_name() {
    let temp = TempDir::new().unwrap();
    let manager = StorageManager::open(temp.path()).unwrap();

    let table = manager.write_sstable(entries(&[("a", Some("1"))]), 1).unwrap();

    assert_eq!(table.path, temp.path().join("sstable_000001.sst"));
    assert_eq!(file_names(temp.path()), vec!["sstable_000001.sst"]);
}

#[test]
fn test_manager_failed_write_leaves_no_file() {
    let temp = TempDir::new().unwrap();
    {
        let manager = StorageManager::open(temp.path()).unwrap();
        manager.write_sstable(entries(&[("a", Some("1"))]), 1).unwrap();

        let result = manager.write_sstable(entries(&[("z", Some("1")), ("b", Some("2"))]), 2);

        assert!(matches!(result, Err(TallyError::Storage(_))));
        assert_eq!(manager.sstable_count(), 1);
        assert_eq!(manager.flushed_lsn(), 1);
        assert_eq!(file_names(temp.path()), vec!["sstable_000001.sst"]);

        manager.write_sstable(entries(&[("b", Some("3"))]), 3).unwrap();
    }

    let manager = StorageManager::open(temp.path()).unwrap();

    assert_eq!(manager.sstable_count(), 2);
    assert_eq!(manager.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(manager.get(b"b").unwrap(), Some(b"3".to_vec()));
    assert_eq!(manager.flushed_lsn(), 3);
}

#[test]
fn test_manager_open_removes_unfinished_tables() {
    let temp = TempDir::new().unwrap();
    {
        let manager = StorageManager::open(temp.path()).unwrap();
        manager.write_sstable(entries(&[("a", Some("1"))]), 1).unwrap();
    }
    fs::write(temp.path().join("sstable_000002.sst.tmp"), b"TLKV partial").unwrap();

    let manager = StorageManager::open(temp.path()).unwrap();

    assert_eq!(manager.sstable_count(), 1);
    assert_eq!(manager.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(file_names(temp.path()), vec!["sstable_000001.sst"]);
}

#[test]
fn test_manager_compaction_keeps_newest_and_tombstones() {
    let temp = TempDir::new().unwrap();
    let manager = StorageManager::open(temp.path()).unwrap();

    manager
        .write_sstable(entries(&[("a", Some("1")), ("b", Some("1")), ("c", Some("1"))]), 1)
        .unwrap();
    manager
        .write_sstable(entries(&[("a", Some("2")), ("b", None)]), 2)
        .unwrap();
    manager.write_sstable(entries(&[("c", Some("3"))]), 3).unwrap();

    let compacted = manager.compact().unwrap().unwrap();

    assert_eq!(compacted.entry_count, 3);
    assert_eq!(compacted.max_lsn, 3);
    assert_eq!(manager.sstable_count(), 1);
    assert_eq!(manager.get(b"a").unwrap(), Some(b"2".to_vec()));
    assert_eq!(manager.get(b"b").unwrap(), None);
    assert_eq!(manager.get(b"c").unwrap(), Some(b"3".to_vec()));

    let files = fs::read_dir(temp.path()).unwrap().count();
    assert_eq!(files, 1);
}

#[test]
fn test_manager_compaction_needs_two_tables() {
    let temp = TempDir::new().unwrap();
    let manager = StorageManager::open(temp.path()).unwrap();

    assert!(manager.compact().unwrap().is_none());
    manager.write_sstable(entries(&[("a", Some("1"))]), 1).unwrap();
    assert!(manager.compact().unwrap().is_none());
}
