use std::io::Write;
use std::time::Duration;

use serial_test::serial;

use agentmux::{config::GlobalConfig, AppError};

fn full_toml() -> &'static str {
    r#"
[buffer]
max_bytes = 65536

[idle]
enabled = false
threshold_seconds = 120
sweep_interval_seconds = 10

[spawn]
default_shell = "/bin/sh"
settle_delay_ms = 250
stale_session_window_seconds = 5
cols = 100
rows = 40

[agents]
claude_command = "claude-dev"
codex_command = "codex-nightly"

[env]
AGENTMUX = "1"
"#
}

#[test]
fn empty_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config is valid");

    assert_eq!(config, GlobalConfig::default());
    assert_eq!(config.buffer.max_bytes, 256 * 1024);
    assert!(config.idle.enabled);
    assert_eq!(config.idle_threshold(), Duration::from_secs(300));
    assert_eq!(config.sweep_interval(), Duration::from_secs(30));
    assert_eq!(config.spawn.settle_delay_ms, 500);
    assert_eq!(config.spawn.stale_session_window_seconds, 10);
    assert_eq!((config.spawn.cols, config.spawn.rows), (120, 30));
    assert_eq!(config.agents.claude_command, "claude");
    assert_eq!(config.agents.codex_command, "codex");
}

#[test]
fn full_config_parses() {
    let config = GlobalConfig::from_toml_str(full_toml()).expect("valid config");

    assert_eq!(config.buffer.max_bytes, 65536);
    assert!(!config.idle.enabled);
    assert_eq!(config.idle_threshold(), Duration::from_secs(120));
    assert_eq!(config.sweep_interval(), Duration::from_secs(10));
    assert_eq!(config.resolved_shell(), "/bin/sh");
    assert_eq!(config.env.get("AGENTMUX").map(String::as_str), Some("1"));
}

#[test]
fn manager_config_maps_durations() {
    let config = GlobalConfig::from_toml_str(full_toml()).expect("valid config");
    let manager = config.manager_config();

    assert_eq!(manager.buffer_max_bytes, 65536);
    assert_eq!(manager.settle_delay, Duration::from_millis(250));
    assert_eq!(manager.stale_session_window, Duration::from_secs(5));
    assert_eq!((manager.cols, manager.rows), (100, 40));
}

#[test]
fn adapter_settings_carry_commands_and_env() {
    let config = GlobalConfig::from_toml_str(full_toml()).expect("valid config");
    let settings = config.adapter_settings();

    assert_eq!(settings.default_shell, "/bin/sh");
    assert_eq!(settings.claude_command, "claude-dev");
    assert_eq!(settings.codex_command, "codex-nightly");
    assert_eq!(settings.env.len(), 1);
}

#[test]
fn tiny_buffer_is_rejected() {
    let err = GlobalConfig::from_toml_str("[buffer]\nmax_bytes = 10\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("buffer.max_bytes")));
}

#[test]
fn zero_durations_are_rejected() {
    let err = GlobalConfig::from_toml_str("[idle]\nsweep_interval_seconds = 0\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("sweep_interval_seconds")));

    let err = GlobalConfig::from_toml_str("[idle]\nthreshold_seconds = 0\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("threshold_seconds")));
}

#[test]
fn zero_terminal_size_is_rejected() {
    let err = GlobalConfig::from_toml_str("[spawn]\ncols = 0\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn empty_agent_command_is_rejected() {
    let err = GlobalConfig::from_toml_str("[agents]\nclaude_command = \"  \"\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("agent commands")));
}

#[test]
fn malformed_toml_is_config_error() {
    let err = GlobalConfig::from_toml_str("[buffer\nmax_bytes = 1").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(full_toml().as_bytes()).expect("write config");

    let config = GlobalConfig::load_from_path(file.path()).expect("load config");
    assert_eq!(config.spawn.cols, 100);
}

#[test]
fn load_from_missing_path_is_config_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = GlobalConfig::load_from_path(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}

#[test]
#[serial]
fn shell_falls_back_to_environment() {
    let previous = std::env::var("SHELL").ok();
    std::env::set_var("SHELL", "/usr/bin/fish");

    let config = GlobalConfig::default();
    assert_eq!(config.resolved_shell(), "/usr/bin/fish");

    match previous {
        Some(shell) => std::env::set_var("SHELL", shell),
        None => std::env::remove_var("SHELL"),
    }
}

#[test]
#[serial]
fn configured_shell_beats_environment() {
    let config = GlobalConfig::from_toml_str("[spawn]\ndefault_shell = \"/bin/dash\"\n")
        .expect("valid config");
    assert_eq!(config.resolved_shell(), "/bin/dash");
}
