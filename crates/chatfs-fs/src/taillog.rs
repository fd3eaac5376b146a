//! Append-only log with blocking reads.
//!
//! Readers asking for bytes past the current end wait until an append makes
//! them available. There is no end-of-file: a read at the tail blocks until
//! the next append, and cancelling the read future is the only other way
//! out.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

struct LogState {
    buffer: Vec<u8>,
    mtime: u32,
}

pub struct TailLog {
    state: Mutex<LogState>,
    /// Current length; every append publishes the new value and wakes all
    /// waiting readers.
    length: watch::Sender<usize>,
}

impl TailLog {
    pub fn new() -> Self {
        let (length, _) = watch::channel(0);
        Self {
            state: Mutex::new(LogState {
                buffer: Vec::new(),
                mtime: 0,
            }),
            length,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, bytes: &[u8]) {
        let mut state = self.lock();
        state.buffer.extend_from_slice(bytes);
        state.mtime = crate::unix_now();
        self.length.send_replace(state.buffer.len());
    }

    /// Read up to `count` bytes starting at `offset`, waiting for data if
    /// `offset` is at or past the end.
    pub async fn read(&self, offset: u64, count: usize) -> Vec<u8> {
        let mut length = self.length.subscribe();
        if length.wait_for(|len| *len as u64 > offset).await.is_err() {
            return Vec::new();
        }

        let state = self.lock();
        let start = offset as usize;
        let end = state.buffer.len().min(start.saturating_add(count));
        state.buffer[start..end].to_vec()
    }

    pub fn len(&self) -> u64 {
        self.lock().buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time of the last append, zero if nothing was appended yet.
    pub fn mtime(&self) -> u32 {
        self.lock().mtime
    }
}

impl Default for TailLog {
    fn default() -> Self {
        Self::new()
    }
}
