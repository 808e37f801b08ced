//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::adapter::AdapterSettings;
use crate::orchestrator::session_manager::ManagerConfig;
use crate::{AppError, Result};

/// Smallest replay buffer accepted; anything lower cannot hold a screenful.
const MIN_BUFFER_BYTES: usize = 1024;

/// Replay buffer sizing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BufferConfig {
    /// Maximum number of bytes retained per session.
    #[serde(default = "default_buffer_max_bytes")]
    pub max_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_buffer_max_bytes(),
        }
    }
}

fn default_buffer_max_bytes() -> usize {
    256 * 1024
}

/// Idle hibernation tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IdleConfig {
    /// Whether the idle monitor runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Silence required before a session is hibernated.
    #[serde(default = "default_idle_threshold")]
    pub threshold_seconds: u64,
    /// Interval between sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_seconds: default_idle_threshold(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_idle_threshold() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    30
}

/// Process spawning parameters.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SpawnSettings {
    /// Shell used when a session supplies no override. Falls back to `$SHELL`.
    #[serde(default)]
    pub default_shell: Option<String>,
    /// Grace period before a post-spawn command is typed into the shell.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// How long after a resume attempt the stale-id text is looked for.
    #[serde(default = "default_stale_window")]
    pub stale_session_window_seconds: u64,
    /// Initial terminal width.
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// Initial terminal height.
    #[serde(default = "default_rows")]
    pub rows: u16,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            default_shell: None,
            settle_delay_ms: default_settle_delay_ms(),
            stale_session_window_seconds: default_stale_window(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_stale_window() -> u64 {
    10
}

fn default_cols() -> u16 {
    120
}

fn default_rows() -> u16 {
    30
}

/// Agent CLI binaries.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentCommands {
    /// Command that launches Claude Code.
    #[serde(default = "default_claude_command")]
    pub claude_command: String,
    /// Command that launches Codex.
    #[serde(default = "default_codex_command")]
    pub codex_command: String,
}

impl Default for AgentCommands {
    fn default() -> Self {
        Self {
            claude_command: default_claude_command(),
            codex_command: default_codex_command(),
        }
    }
}

fn default_claude_command() -> String {
    "claude".into()
}

fn default_codex_command() -> String {
    "codex".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Replay buffer settings.
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Idle monitor settings.
    #[serde(default)]
    pub idle: IdleConfig,
    /// Spawn settings.
    #[serde(default)]
    pub spawn: SpawnSettings,
    /// Agent binaries.
    #[serde(default)]
    pub agents: AgentCommands,
    /// Extra environment variables applied to every session.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Idle hibernation threshold.
    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle.threshold_seconds)
    }

    /// Interval between idle sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle.sweep_interval_seconds)
    }

    /// Shell used when a session supplies no override.
    ///
    /// Resolution order: configured `default_shell`, `$SHELL`, platform default.
    #[must_use]
    pub fn resolved_shell(&self) -> String {
        if let Some(shell) = self.spawn.default_shell.as_ref().filter(|s| !s.is_empty()) {
            return shell.clone();
        }
        match env::var("SHELL") {
            Ok(shell) if !shell.is_empty() => shell,
            _ => {
                debug!("SHELL not set, using platform default");
                platform_default_shell().to_owned()
            }
        }
    }

    /// The subset of settings the session manager needs.
    #[must_use]
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            buffer_max_bytes: self.buffer.max_bytes,
            settle_delay: Duration::from_millis(self.spawn.settle_delay_ms),
            stale_session_window: Duration::from_secs(self.spawn.stale_session_window_seconds),
            cols: self.spawn.cols,
            rows: self.spawn.rows,
        }
    }

    /// Inputs every adapter needs to build a spawn configuration.
    #[must_use]
    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            default_shell: self.resolved_shell(),
            claude_command: self.agents.claude_command.clone(),
            codex_command: self.agents.codex_command.clone(),
            env: self.env.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.buffer.max_bytes < MIN_BUFFER_BYTES {
            return Err(AppError::Config(format!(
                "buffer.max_bytes must be at least {MIN_BUFFER_BYTES}"
            )));
        }

        if self.idle.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "idle.sweep_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.idle.threshold_seconds == 0 {
            return Err(AppError::Config(
                "idle.threshold_seconds must be greater than zero".into(),
            ));
        }

        if self.spawn.cols == 0 || self.spawn.rows == 0 {
            return Err(AppError::Config(
                "spawn.cols and spawn.rows must be greater than zero".into(),
            ));
        }

        if self.agents.claude_command.trim().is_empty() || self.agents.codex_command.trim().is_empty()
        {
            return Err(AppError::Config("agent commands must not be empty".into()));
        }

        Ok(())
    }
}

#[cfg(windows)]
fn platform_default_shell() -> &'static str {
    "powershell.exe"
}

#[cfg(not(windows))]
fn platform_default_shell() -> &'static str {
    "/bin/bash"
}
