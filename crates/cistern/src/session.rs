//! # Write Session
//!
//! Buffer state for one in-progress write. The session accumulates
//! appended bytes and tracks how far into the buffer data has already been
//! persisted, so a flush only ever touches the unflushed suffix. All
//! decisions about *when* to flush live in the coordinator; this type just
//! keeps the cursor math honest.

use bytes::BytesMut;
use tracing::error;

/// Outcome of a completed or cancelled write session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Total bytes appended to the session.
    pub appended: u64,
    /// Bytes persisted to the store across all flushes.
    pub persisted: u64,
    /// Number of chunk records the session produced.
    pub flushes: u32,
    /// False when the session was cancelled or abandoned.
    pub completed: bool,
}

/// Mutable state of one write session, owned by the coordinator.
#[derive(Debug)]
pub(crate) struct WriteSession {
    id: u64,
    start_offset: u64,
    buffer: BytesMut,
    /// Bytes of `buffer` already persisted.
    flushed_len: usize,
    flushes: u32,
}

impl WriteSession {
    pub(crate) fn new(id: u64, start_offset: u64) -> Self {
        Self {
            id,
            start_offset,
            buffer: BytesMut::new(),
            flushed_len: 0,
            flushes: 0,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub(crate) fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub(crate) fn buffered_len(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub(crate) fn unflushed_len(&self) -> u64 {
        self.buffer.len().saturating_sub(self.flushed_len) as u64
    }

    /// Absolute resource offset where the next flush lands.
    pub(crate) fn flush_offset(&self) -> u64 {
        self.start_offset + self.flushed_len as u64
    }

    /// The suffix of the buffer not yet persisted.
    pub(crate) fn unflushed(&mut self) -> &[u8] {
        self.repair_cursor();
        &self.buffer[self.flushed_len..]
    }

    /// Record that everything buffered so far has been persisted.
    pub(crate) fn mark_flushed(&mut self) {
        self.flushed_len = self.buffer.len();
        self.flushes += 1;
    }

    pub(crate) fn flushes(&self) -> u32 {
        self.flushes
    }

    pub(crate) fn stats(&self, completed: bool) -> WriteStats {
        WriteStats {
            appended: self.buffer.len() as u64,
            persisted: self.flushed_len as u64,
            flushes: self.flushes,
            completed,
        }
    }

    /// The cursor can never run past the buffer; if it somehow does, clamp
    /// it rather than slice out of bounds.
    fn repair_cursor(&mut self) {
        if self.flushed_len > self.buffer.len() {
            error!(
                session = self.id,
                flushed = self.flushed_len,
                buffered = self.buffer.len(),
                "Flush cursor ran past the buffer, clamping"
            );
            self.flushed_len = self.buffer.len();
        }
    }
}
