//! In-memory random-access file.
//!
//! [`RamFile`] behaves like a seekable file opened for reading and writing:
//! writes past the end zero-fill the gap, the buffer never shrinks on write,
//! and reads report exhaustion the way a positional read of a real file
//! does.

use std::io;

use chatfs_shared::constants::MAX_FILE_SIZE;

use crate::error::{FsError, Result};

/// Outcome of [`RamFile::read_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    pub count: usize,
    /// Fewer bytes than requested were available.
    pub exhausted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RamFile {
    buffer: Vec<u8>,
    cursor: u64,
}

impl RamFile {
    /// Create a file holding a copy of `contents`.
    pub fn new(contents: &[u8]) -> Self {
        Self {
            buffer: contents.to_vec(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop all contents and reset the cursor.
    pub fn truncate(&mut self) {
        self.buffer = Vec::new();
        self.cursor = 0;
    }

    /// Copy bytes starting at `offset` into `buf`.
    ///
    /// A zero-length `buf` is never exhausted. A non-empty `buf` is exhausted
    /// whenever it could not be filled, including reads at or past the end.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> ReadResult {
        if buf.is_empty() {
            return ReadResult {
                count: 0,
                exhausted: false,
            };
        }
        if offset >= self.len() {
            return ReadResult {
                count: 0,
                exhausted: true,
            };
        }
        let start = offset as usize;
        let count = (self.buffer.len() - start).min(buf.len());
        buf[..count].copy_from_slice(&self.buffer[start..start + count]);
        ReadResult {
            count,
            exhausted: count < buf.len(),
        }
    }

    /// Write `data` at `offset`, zero-filling any gap. Writes all of `data`
    /// or nothing; an empty write never grows the file.
    ///
    /// Fails with [`FsError::FileTooLarge`] when the write would end past
    /// [`MAX_FILE_SIZE`].
    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= MAX_FILE_SIZE)
            .ok_or(FsError::FileTooLarge(offset))?;
        let start = usize::try_from(offset).map_err(|_| FsError::FileTooLarge(offset))?;
        let end = usize::try_from(end).map_err(|_| FsError::FileTooLarge(offset))?;
        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[start..end].copy_from_slice(data);
        Ok(data.len())
    }
}

impl io::Read for RamFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.read_at(buf, self.cursor);
        self.cursor += result.count as u64;
        Ok(result.count)
    }
}
