//! Per-session record owned by the session manager.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::line_assembler::LineAssembler;
use super::replay_buffer::ReplayBuffer;
use super::stale_resume::StaleResumeCheck;
use crate::adapter::Adapter;
use crate::models::session::{Presentation, SessionSnapshot, TerminalMode, TerminalState};
use crate::pty::PtyProcess;

/// One live session: process handle, classification state, and replay buffer.
///
/// Only the session manager touches these fields, always under its
/// registry lock.
pub(crate) struct Session {
    pub id: String,
    pub mode: TerminalMode,
    pub generation: u64,
    pub conversation_id: Option<String>,
    pub state: TerminalState,
    pub presentation: Presentation,
    pub buffer: ReplayBuffer,
    pub lines: LineAssembler,
    pub last_output_at: Instant,
    pub last_output_wall: DateTime<Utc>,
    pub stale_check: Option<StaleResumeCheck>,
    pub adapter: Adapter,
    pub process: Box<dyn PtyProcess>,
}

impl Session {
    /// Append output and refresh the activity timestamps.
    pub fn record_output(&mut self, chunk: &Bytes, now: Instant) {
        self.buffer.push(chunk);
        self.last_output_at = now;
        self.last_output_wall = Utc::now();
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            mode: self.mode,
            state: self.state,
            presentation: self.presentation,
            generation: self.generation,
            conversation_id: self.conversation_id.clone(),
            last_output_at: self.last_output_wall,
            idle_for: now.saturating_duration_since(self.last_output_at),
        }
    }
}
