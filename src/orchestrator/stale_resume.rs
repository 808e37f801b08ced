//! Stale resume-id detection.
//!
//! When an agent is asked to resume a conversation it no longer has, it
//! prints a fixed error line. The text is specific to one agent's current
//! wording, so matching lives here and nowhere else; callers only see the
//! resulting `sessionNotFound` event.

use std::sync::OnceLock;

use regex::bytes::Regex;
use tokio::time::Instant;

/// Text printed by the agent when a resume id is unknown.
pub const NOT_FOUND_TEXT: &str = "No conversation found with session ID";

/// One-shot, time-boxed check armed after a resume attempt.
#[derive(Debug, Clone, Copy)]
pub struct StaleResumeCheck {
    deadline: Instant,
}

impl StaleResumeCheck {
    /// Arm a check that expires at `deadline`.
    #[must_use]
    pub fn until(deadline: Instant) -> Self {
        Self { deadline }
    }

    /// Whether the detection window is still open at `now`.
    #[must_use]
    pub fn is_open(&self, now: Instant) -> bool {
        now <= self.deadline
    }
}

/// Whether `chunk` contains the not-found text, ignoring interleaved ANSI
/// escape sequences.
#[must_use]
pub fn matches_not_found(chunk: &[u8]) -> bool {
    let plain = strip_ansi(chunk);
    String::from_utf8_lossy(&plain).contains(NOT_FOUND_TEXT)
}

/// Remove CSI and OSC escape sequences from raw terminal output.
#[must_use]
pub fn strip_ansi(chunk: &[u8]) -> Vec<u8> {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").ok()
    });

    match pattern {
        Some(re) => re.replace_all(chunk, &b""[..]).into_owned(),
        None => chunk.to_vec(),
    }
}
