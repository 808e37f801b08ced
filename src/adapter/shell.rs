//! Raw shell adapter: no resume, no output classification.

use super::{base_env, resolve_shell, AdapterSettings, SpawnConfig, SpawnParams};

/// Plain interactive shell.
#[derive(Debug, Clone)]
pub struct ShellAdapter {
    settings: AdapterSettings,
}

impl ShellAdapter {
    /// Create an adapter with resolved settings.
    #[must_use]
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    /// Resolve the shell and environment; conversation ids and prompts are ignored.
    #[must_use]
    pub fn build_spawn_config(&self, params: &SpawnParams<'_>) -> SpawnConfig {
        let (command, args) = resolve_shell(&self.settings, params.shell_override);
        SpawnConfig {
            command,
            args,
            cwd: params.cwd.to_path_buf(),
            env: base_env(&self.settings),
            post_spawn_command: None,
        }
    }
}
