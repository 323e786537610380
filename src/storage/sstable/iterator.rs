//! SSTable Iterator
//!
//! Sequential iteration over all entries in an SSTable.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use crate::error::{Result, TallyError};

use super::{le_u32, HEADER_SIZE, TOMBSTONE_MARKER};

/// Iterator over SSTable entries in sorted key order
pub struct SSTableIterator<'a> {
    file: &'a mut BufReader<File>,
    /// Stop reading when we reach this offset (start of index block)
    end_offset: u64,
    /// Current position in file
    current_offset: u64,
}

impl<'a> SSTableIterator<'a> {
    /// Create a new iterator starting from the data block
    pub(super) fn new(file: &'a mut BufReader<File>, end_offset: u64) -> Result<Self> {
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end_offset,
            current_offset: HEADER_SIZE,
        })
    }

    fn read_entry(&mut self) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let mut header = [0u8; 8];
        self.file.read_exact(&mut header)?;

        let key_len = le_u32(&header[0..4]) as usize;
        let val_len = le_u32(&header[4..8]);

        let mut key = vec![0u8; key_len];
        self.file.read_exact(&mut key)?;

        let mut entry_size = 8 + key_len as u64;

        let value = if val_len == TOMBSTONE_MARKER {
            None
        } else {
            let mut v = vec![0u8; val_len as usize];
            self.file.read_exact(&mut v)?;
            entry_size += val_len as u64;
            Some(v)
        };

        self.current_offset += entry_size;
        if self.current_offset > self.end_offset {
            return Err(TallyError::Storage(format!(
                "SSTable entry overruns data block at offset {}",
                self.current_offset
            )));
        }

        Ok((key, value))
    }
}

impl<'a> Iterator for SSTableIterator<'a> {
    /// (key, Option<value>): None value means tombstone
    type Item = Result<(Vec<u8>, Option<Vec<u8>>)>;

    fn next(&mut self) -> Option<Self::Item> {
        // Stop at index block
        if self.current_offset >= self.end_offset {
            return None;
        }

        let item = self.read_entry();
        if item.is_err() {
            // Do not keep reading past a broken entry
            self.current_offset = self.end_offset;
        }
        Some(item)
    }
}
