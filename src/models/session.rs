//! Session model: terminal modes, the terminal state machine, and snapshots.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which agent (or plain shell) a session runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TerminalMode {
    /// Claude Code CLI; emits newline-delimited JSON events and supports resume.
    ClaudeCode,
    /// Codex CLI; output protocol is not interpreted.
    Codex,
    /// Plain interactive shell.
    Shell,
}

impl TerminalMode {
    /// Whether sessions in this mode carry a resumable conversation id.
    #[must_use]
    pub fn supports_resume(self) -> bool {
        !matches!(self, Self::Shell)
    }

    /// Whether a brand-new conversation can be pinned to a caller-chosen id.
    #[must_use]
    pub fn pins_conversation_id(self) -> bool {
        matches!(self, Self::ClaudeCode)
    }
}

/// Coarse classification of what the session's process is doing.
///
/// ```text
/// starting -> running <-> awaiting_input -> idle
///        any of the above -> error | dead
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// Process spawned, no output classified yet.
    Starting,
    /// Agent is actively producing output.
    Running,
    /// Agent is blocked on a question or permission request.
    AwaitingInput,
    /// Agent finished its turn and waits for the user.
    Idle,
    /// Agent reported an error; requires an explicit restart.
    Error,
    /// Process exited.
    Dead,
}

impl TerminalState {
    /// `error` and `dead` accept no further classification.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Dead)
    }
}

/// Whether the consumer currently holds presentation resources for a session.
///
/// Independent from the process lifecycle: hibernation never touches the
/// process or its replay buffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Presentation {
    /// Consumer is (or may be) rendering the session.
    Attached,
    /// Consumer was told to release its rendering resources.
    Hibernated,
}

/// Point-in-time copy of a session's observable fields, as returned by `list()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSnapshot {
    /// Work-item key.
    pub id: String,
    /// Agent mode.
    pub mode: TerminalMode,
    /// Classified terminal state.
    pub state: TerminalState,
    /// Presentation lifecycle.
    pub presentation: Presentation,
    /// Generation of the live process instance.
    pub generation: u64,
    /// Conversation id known for this session, if any.
    pub conversation_id: Option<String>,
    /// Wall-clock time of the most recent output chunk (spawn time if none yet).
    pub last_output_at: DateTime<Utc>,
    /// Time elapsed since the most recent output chunk.
    #[serde(with = "duration_millis")]
    pub idle_for: Duration,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)] // Signature fixed by serde `with`.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
