//! Growable I/O buffer with a consumption cursor.
//!
//! # Responsibilities
//! - Accumulate bytes read from a socket between parse steps
//! - Hand out the unconsumed region for line scanning and decoding
//! - Enforce the configured buffer limit on growth
//!
//! # Design Decisions
//! - Consumed bytes stay in place until `reset`, so decoders that rewrite
//!   the unconsumed region keep the prefix intact
//! - Growth doubles from 512 bytes while that stays under the limit, and
//!   otherwise asks for exactly what is needed

use crate::error::{ProxyError, ProxyResult};

const INITIAL_CAPACITY: usize = 512;

/// Byte buffer with a cursor separating consumed from unconsumed data.
///
/// `0 <= cursor <= len <= capacity` holds at all times.
#[derive(Debug)]
pub struct Iob {
    buf: Vec<u8>,
    cursor: usize,
    limit: usize,
}

impl Iob {
    /// Create an empty buffer that refuses to grow past `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            cursor: 0,
            limit,
        }
    }

    /// Append freshly read bytes.
    ///
    /// Fails with [`ProxyError::Memory`] when the buffer would exceed its
    /// limit, leaving the contents unchanged.
    pub fn append(&mut self, data: &[u8]) -> ProxyResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        // One extra byte mirrors the terminator the limit has always accounted for.
        let need = self.buf.len() + data.len() + 1;
        if need > self.limit {
            tracing::warn!(
                used = self.buf.len(),
                incoming = data.len(),
                limit = self.limit,
                "Buffer limit reached while extending the buffer"
            );
            return Err(ProxyError::Memory { limit: self.limit });
        }

        if need > self.buf.capacity() {
            let mut want = self.buf.capacity().max(INITIAL_CAPACITY);
            while want <= need {
                want *= 2;
            }
            let target = if want <= self.limit { want } else { need };
            self.buf.reserve_exact(target - self.buf.len());
        }

        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Bytes not yet consumed.
    pub fn unconsumed(&self) -> &[u8] {
        &self.buf[self.cursor..]
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.buf.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance the cursor by `n` bytes, clamped to the end of data.
    pub fn consume(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.buf.len());
    }

    /// Take every unconsumed byte, leaving the buffer drained.
    pub fn drain(&mut self) -> Vec<u8> {
        let out = self.buf[self.cursor..].to_vec();
        self.cursor = self.buf.len();
        out
    }

    /// Replace the unconsumed region, keeping the consumed prefix.
    pub fn replace_unconsumed(&mut self, data: Vec<u8>) -> ProxyResult<()> {
        if self.cursor + data.len() + 1 > self.limit {
            return Err(ProxyError::Memory { limit: self.limit });
        }
        self.buf.truncate(self.cursor);
        self.buf.extend_from_slice(&data);
        Ok(())
    }

    /// Drop the backing store and all markers.
    pub fn reset(&mut self) {
        self.buf = Vec::new();
        self.cursor = 0;
    }

    /// Bytes held, consumed prefix included.
    pub fn total_len(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
