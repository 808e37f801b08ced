//! Reassembles newline-delimited lines across pty read boundaries.
//!
//! A pty read ends wherever the kernel buffer did, so one protocol line can
//! arrive in several chunks. [`LineAssembler::push`] hands back only whole
//! lines and keeps the unterminated tail for the next chunk. A tail that
//! outgrows the limit is discarded up to its terminating newline.

use bytes::{Bytes, BytesMut};
use tracing::debug;

/// Default ceiling for a single unterminated line.
pub const MAX_PENDING_LINE_BYTES: usize = 1024 * 1024;

/// Per-session carry-over buffer for partial lines.
#[derive(Debug)]
pub struct LineAssembler {
    pending: BytesMut,
    max_pending: usize,
    discarding: bool,
}

impl LineAssembler {
    /// Create an assembler that holds at most `max_pending` unterminated bytes.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            max_pending,
            discarding: false,
        }
    }

    /// Feed one chunk. Returns every line completed by it, each ending in
    /// `\n`, or `None` when the chunk completed no line.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Bytes> {
        let mut chunk = chunk;
        if self.discarding {
            let newline = chunk.iter().position(|&b| b == b'\n')?;
            self.discarding = false;
            chunk = &chunk[newline + 1..];
        }

        let Some(last_newline) = chunk.iter().rposition(|&b| b == b'\n') else {
            self.hold(chunk);
            return None;
        };

        let (complete, tail) = chunk.split_at(last_newline + 1);
        let lines = if self.pending.is_empty() {
            Bytes::copy_from_slice(complete)
        } else {
            self.pending.extend_from_slice(complete);
            self.pending.split().freeze()
        };
        self.hold(tail);
        Some(lines)
    }

    /// Bytes waiting for their terminating newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn hold(&mut self, tail: &[u8]) {
        if tail.is_empty() {
            return;
        }
        if self.pending.len() + tail.len() > self.max_pending {
            debug!(
                dropped = self.pending.len() + tail.len(),
                limit = self.max_pending,
                "unterminated line over limit, discarding"
            );
            self.pending.clear();
            self.discarding = true;
            return;
        }
        self.pending.extend_from_slice(tail);
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(MAX_PENDING_LINE_BYTES)
    }
}
