//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{Result, TallyError};

use super::entry::parse_header;
use super::{WalEntry, HEADER_SIZE, MAX_ENTRY_SIZE};

/// Reads entries from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset just past the last complete, valid entry
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next entry from the WAL
    ///
    /// Returns:
    /// - `Ok(Some(entry))`: a complete entry with a valid checksum
    /// - `Ok(None)`: end of file, or a partially written entry at the tail
    /// - `Err(WalCorruption)`: a complete entry whose checksum does not match
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        if self.read_full(&mut header)? < HEADER_SIZE {
            return Ok(None);
        }

        let (lsn, crc, len) = parse_header(&header);
        if len > MAX_ENTRY_SIZE {
            return Err(TallyError::WalCorruption(format!(
                "Entry at offset {} claims {} bytes",
                self.position, len
            )));
        }

        let mut payload = vec![0u8; len as usize];
        if self.read_full(&mut payload)? < payload.len() {
            return Ok(None);
        }

        let entry = WalEntry::from_parts(lsn, crc, &payload)?;
        self.position += (HEADER_SIZE + payload.len()) as u64;
        Ok(Some(entry))
    }

    /// Offset just past the last valid entry read so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    /// Fill `buf` as far as the file allows; returns the bytes read
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

/// Iterator over WAL entries
///
/// Stops after the first error.
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
