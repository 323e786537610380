//! SSTable Reader
//!
//! Opens SSTable files and provides O(log n) key lookups via in-memory index.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Result, TallyError};

use super::iterator::SSTableIterator;
use super::{le_u16, le_u32, le_u64, FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Reader for SSTable files with in-memory index for O(log n) lookups
pub struct SSTableReader {
    /// Location on disk (needed to remove the file after compaction)
    path: PathBuf,
    /// File handle for reading entries
    file: BufReader<File>,
    /// In-memory index: key → file offset
    index: BTreeMap<Vec<u8>, u64>,
    entry_count: u64,
    max_lsn: u64,
    /// Index block starting offset (for iteration)
    index_offset: u64,
}

impl SSTableReader {
    /// Open an SSTable for reading
    ///
    /// Loads the entire index into memory for fast lookups.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(TallyError::Storage(format!(
                "SSTable {} too small: {} bytes",
                path.display(),
                file_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(TallyError::Storage(format!(
                "Invalid SSTable magic: expected TLKV, got {:?}",
                &header[0..4]
            )));
        }

        let version = le_u16(&header[4..6]);
        if version != VERSION {
            return Err(TallyError::Storage(format!(
                "Unsupported SSTable version: {}",
                version
            )));
        }

        let entry_count = le_u64(&header[6..14]);
        let max_lsn = le_u64(&header[14..22]);

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let index_offset = le_u64(&footer[0..8]);
        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(TallyError::Storage(format!(
                "SSTable {} has invalid index offset {}",
                path.display(),
                index_offset
            )));
        }

        // Load index into memory
        let mut index = BTreeMap::new();
        file.seek(SeekFrom::Start(index_offset))?;

        let index_block_size = file_size - FOOTER_SIZE - index_offset;
        let mut index_data = vec![0u8; index_block_size as usize];
        file.read_exact(&mut index_data)?;

        // Parse index entries: [key_len(4)][offset(8)][key]
        let mut pos = 0;
        while pos + 12 <= index_data.len() {
            let key_len = le_u32(&index_data[pos..pos + 4]) as usize;
            let offset = le_u64(&index_data[pos + 4..pos + 12]);
            pos += 12;

            if pos + key_len > index_data.len() {
                return Err(TallyError::Storage(format!(
                    "SSTable {} has a truncated index",
                    path.display()
                )));
            }
            index.insert(index_data[pos..pos + key_len].to_vec(), offset);
            pos += key_len;
        }

        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            index,
            entry_count,
            max_lsn,
            index_offset,
        })
    }

    /// Get a value by key: O(log n) lookup via in-memory index
    ///
    /// Returns:
    /// - `Ok(Some(value))`: key found with value
    /// - `Ok(None)`: key found but is a tombstone (deleted)
    /// - `Err(KeyNotFound)`: key not in this SSTable
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let offset = match self.index.get(key) {
            Some(&off) => off,
            None => return Err(TallyError::KeyNotFound),
        };

        self.file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; 8];
        self.file.read_exact(&mut header)?;

        let key_len = le_u32(&header[0..4]) as usize;
        let val_len = le_u32(&header[4..8]);

        // Skip the key (we already know it matches)
        self.file.seek_relative(key_len as i64)?;

        if val_len == TOMBSTONE_MARKER {
            return Ok(None);
        }

        let mut value = vec![0u8; val_len as usize];
        self.file.read_exact(&mut value)?;

        Ok(Some(value))
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Highest WAL sequence number this table covers
    pub fn max_lsn(&self) -> u64 {
        self.max_lsn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the minimum key in this SSTable (for range filtering)
    pub fn min_key(&self) -> Option<&[u8]> {
        self.index.keys().next().map(|k| k.as_slice())
    }

    /// Get the maximum key in this SSTable (for range filtering)
    pub fn max_key(&self) -> Option<&[u8]> {
        self.index.keys().next_back().map(|k| k.as_slice())
    }

    /// Quick check if a key might be in this SSTable (range check)
    /// Returns false only if the key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false, // Empty SSTable
        }
    }

    /// Create an iterator over all entries (used by compaction)
    pub fn iter(&mut self) -> Result<SSTableIterator<'_>> {
        SSTableIterator::new(&mut self.file, self.index_offset)
    }
}
