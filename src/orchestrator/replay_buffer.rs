//! Bounded replay buffer.
//!
//! Keeps the most recent output of a session so a consumer can reattach
//! without relying on the pty's own scrollback. When the ceiling is
//! exceeded the oldest bytes are dropped and the retained tail is prefixed
//! with [`RESET_SEQUENCE`], so a cut through the middle of an escape
//! sequence cannot leave a renderer with stale attributes.

use bytes::Bytes;

/// SGR "reset all attributes".
pub const RESET_SEQUENCE: &[u8] = b"\x1b[0m";

/// Capped byte window over a session's output.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    data: Vec<u8>,
    max_bytes: usize,
    truncated: bool,
}

impl ReplayBuffer {
    /// Create an empty buffer holding at most `max_bytes`.
    ///
    /// The ceiling is raised to fit at least the reset prefix plus one byte.
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            data: Vec::new(),
            max_bytes: max_bytes.max(RESET_SEQUENCE.len() + 1),
            truncated: false,
        }
    }

    /// Append a chunk, trimming the oldest bytes on overflow.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.data.len() + chunk.len() <= self.max_bytes {
            self.data.extend_from_slice(chunk);
            return;
        }

        let keep = self.max_bytes - RESET_SEQUENCE.len();
        let mut next = Vec::with_capacity(self.max_bytes);
        next.extend_from_slice(RESET_SEQUENCE);

        if chunk.len() >= keep {
            next.extend_from_slice(&chunk[chunk.len() - keep..]);
        } else {
            let from_old = keep - chunk.len();
            next.extend_from_slice(&self.data[self.data.len() - from_old..]);
            next.extend_from_slice(chunk);
        }

        self.data = next;
        self.truncated = true;
    }

    /// Copy of the retained bytes.
    #[must_use]
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    /// Number of retained bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Configured ceiling.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_bytes
    }

    /// Whether output has ever been dropped.
    #[must_use]
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }
}
