//! Per-mode output adapters.
//!
//! An [`Adapter`] turns a session request into a [`SpawnConfig`] and
//! classifies raw output chunks into state transitions, prompts, and
//! structured events. Adapters are pure: they hold only the resolved
//! [`AdapterSettings`] and never touch session state, so the session
//! manager's control loop stays protocol-agnostic.
//!
//! | Mode                          | Variant                     |
//! |-------------------------------|-----------------------------|
//! | [`TerminalMode::ClaudeCode`]  | [`StructuredAdapter`]       |
//! | [`TerminalMode::Codex`]       | [`PassthroughAdapter`]      |
//! | [`TerminalMode::Shell`]       | [`ShellAdapter`]            |

pub mod passthrough;
pub mod shell;
pub mod structured;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::models::event::StructuredEvent;
use crate::models::prompt::PromptInfo;
use crate::models::session::{TerminalMode, TerminalState};

pub use passthrough::PassthroughAdapter;
pub use shell::ShellAdapter;
pub use structured::StructuredAdapter;

/// Everything needed to launch one session process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Program to execute inside the pty.
    pub command: String,
    /// Arguments passed to `command`.
    pub args: Vec<String>,
    /// Working directory for the process.
    pub cwd: PathBuf,
    /// Environment overrides layered on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Line typed into the process once the shell has settled.
    pub post_spawn_command: Option<String>,
}

/// Resolved inputs shared by every adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterSettings {
    /// Shell used when the session has no override.
    pub default_shell: String,
    /// Claude Code launcher.
    pub claude_command: String,
    /// Codex launcher.
    pub codex_command: String,
    /// Extra environment applied to every session.
    pub env: HashMap<String, String>,
}

/// Per-session inputs to [`Adapter::build_spawn_config`].
#[derive(Debug, Clone, Copy)]
pub struct SpawnParams<'a> {
    /// Working directory.
    pub cwd: &'a Path,
    /// Conversation id to resume, or the fresh id to start with.
    pub conversation_id: Option<&'a str>,
    /// `true` when `conversation_id` names an existing conversation.
    pub resuming: bool,
    /// Shell to use instead of the configured default.
    pub shell_override: Option<&'a str>,
    /// Prompt handed to the agent on launch.
    pub initial_prompt: Option<&'a str>,
}

/// Everything an adapter extracted from one output chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// New state, or `None` when the adapter has no opinion.
    pub state: Option<TerminalState>,
    /// Prompt shown to the user, if any.
    pub prompt: Option<PromptInfo>,
    /// Structured events decoded from the chunk, in order.
    pub events: Vec<StructuredEvent>,
    /// Conversation id announced by the agent.
    pub conversation_id: Option<String>,
}

/// Output adapter, one variant per [`TerminalMode`].
#[derive(Debug, Clone)]
pub enum Adapter {
    /// Newline-delimited JSON event stream.
    Structured(StructuredAdapter),
    /// Undocumented protocol; output is forwarded untouched.
    Passthrough(PassthroughAdapter),
    /// Plain shell.
    Shell(ShellAdapter),
}

impl Adapter {
    /// Select the adapter for `mode`.
    #[must_use]
    pub fn for_mode(mode: TerminalMode, settings: &AdapterSettings) -> Self {
        match mode {
            TerminalMode::ClaudeCode => Self::Structured(StructuredAdapter::new(settings.clone())),
            TerminalMode::Codex => Self::Passthrough(PassthroughAdapter::new(settings.clone())),
            TerminalMode::Shell => Self::Shell(ShellAdapter::new(settings.clone())),
        }
    }

    /// Whether this adapter parses whole lines, so output must be
    /// reassembled across read boundaries before classification.
    #[must_use]
    pub fn is_line_oriented(&self) -> bool {
        matches!(self, Self::Structured(_))
    }

    /// Build the spawn configuration for a session. Pure and deterministic.
    #[must_use]
    pub fn build_spawn_config(&self, params: &SpawnParams<'_>) -> SpawnConfig {
        match self {
            Self::Structured(adapter) => adapter.build_spawn_config(params),
            Self::Passthrough(adapter) => adapter.build_spawn_config(params),
            Self::Shell(adapter) => adapter.build_spawn_config(params),
        }
    }

    /// Extract a prompt from `chunk`.
    #[must_use]
    pub fn detect_prompt(&self, chunk: &[u8]) -> Option<PromptInfo> {
        match self {
            Self::Structured(adapter) => adapter.detect_prompt(chunk),
            Self::Passthrough(_) | Self::Shell(_) => None,
        }
    }

    /// Decode the first structured event in `chunk`.
    #[must_use]
    pub fn parse_event(&self, chunk: &[u8]) -> Option<StructuredEvent> {
        match self {
            Self::Structured(adapter) => adapter.parse_event(chunk),
            Self::Passthrough(_) | Self::Shell(_) => None,
        }
    }

    /// Classify the state implied by `chunk`; `None` leaves the state unchanged.
    #[must_use]
    pub fn detect_state(&self, chunk: &[u8], current: TerminalState) -> Option<TerminalState> {
        match self {
            Self::Structured(adapter) => adapter.detect_state(chunk, current),
            Self::Passthrough(_) | Self::Shell(_) => None,
        }
    }

    /// Conversation id announced in `chunk`, if any.
    #[must_use]
    pub fn detect_conversation_id(&self, chunk: &[u8]) -> Option<String> {
        match self {
            Self::Structured(adapter) => adapter.detect_conversation_id(chunk),
            Self::Passthrough(_) | Self::Shell(_) => None,
        }
    }

    /// Run every detector over `chunk` in one pass.
    #[must_use]
    pub fn classify(&self, chunk: &[u8], current: TerminalState) -> Classification {
        match self {
            Self::Structured(adapter) => adapter.classify(chunk, current),
            Self::Passthrough(_) | Self::Shell(_) => Classification::default(),
        }
    }
}

/// Base environment shared by all modes: terminal capabilities plus the
/// configured overrides.
pub(crate) fn base_env(settings: &AdapterSettings) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("TERM".to_owned(), "xterm-256color".to_owned());
    env.insert("COLORTERM".to_owned(), "truecolor".to_owned());
    for (key, value) in &settings.env {
        env.insert(key.clone(), value.clone());
    }
    env
}

/// Resolve the shell program and its arguments.
///
/// POSIX shells are started as login shells so the user's `PATH` is present
/// when the agent command is typed in.
pub(crate) fn resolve_shell(
    settings: &AdapterSettings,
    shell_override: Option<&str>,
) -> (String, Vec<String>) {
    let shell = shell_override
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&settings.default_shell)
        .to_owned();

    let lower = shell.to_ascii_lowercase();
    let args = if lower.ends_with(".exe") || lower.ends_with("cmd") || lower.contains("powershell")
    {
        Vec::new()
    } else {
        vec!["-l".to_owned()]
    };

    (shell, args)
}

/// Quote `value` for a POSIX shell command line.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/' | b':'))
    {
        return value.to_owned();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
