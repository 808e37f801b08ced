//! Adapter for agents whose output protocol is not interpreted (Codex).
//!
//! Output is forwarded as-is; only the spawn configuration is mode-specific.

use super::{base_env, resolve_shell, shell_quote, AdapterSettings, SpawnConfig, SpawnParams};

/// Pure passthrough adapter.
#[derive(Debug, Clone)]
pub struct PassthroughAdapter {
    settings: AdapterSettings,
}

impl PassthroughAdapter {
    /// Create an adapter with resolved settings.
    #[must_use]
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    /// Launch a login shell and type the agent command once it settles.
    ///
    /// Codex cannot pin a fresh conversation id, so only a resume id is
    /// forwarded.
    #[must_use]
    pub fn build_spawn_config(&self, params: &SpawnParams<'_>) -> SpawnConfig {
        let (command, args) = resolve_shell(&self.settings, params.shell_override);

        let mut line = self.settings.codex_command.clone();
        if let (Some(id), true) = (params.conversation_id, params.resuming) {
            line.push_str(" resume ");
            line.push_str(&shell_quote(id));
        }
        if let Some(prompt) = params.initial_prompt.filter(|p| !p.trim().is_empty()) {
            line.push(' ');
            line.push_str(&shell_quote(prompt));
        }

        SpawnConfig {
            command,
            args,
            cwd: params.cwd.to_path_buf(),
            env: base_env(&self.settings),
            post_spawn_command: Some(line),
        }
    }
}
