//! Adapter for agents that emit newline-delimited JSON events.
//!
//! Every line of a chunk is tried as a JSON object carrying a string `type`
//! field. Lines that fail to parse are skipped silently; a chunk never
//! produces an error.
//!
//! # Event type table
//!
//! | `type`                                                      | State            |
//! |-------------------------------------------------------------|------------------|
//! | `thinking`, `reasoning`, `tool_use`, `tool_result`, `assistant`, `assistant_message`, `text` | `running` |
//! | `input_request`, `permission_request`, `question`           | `awaiting_input` |
//! | `error`                                                     | `error`          |
//! | `result`, `done`                                            | `idle`           |
//! | *(any other)*                                               | unchanged; logged at `DEBUG` |

use serde_json::Value;
use tracing::debug;

use super::{base_env, resolve_shell, shell_quote, AdapterSettings, Classification, SpawnConfig, SpawnParams};
use crate::models::event::StructuredEvent;
use crate::models::prompt::{PromptInfo, PromptKind};
use crate::models::session::TerminalState;

/// One decoded line and where it started in its chunk.
struct ParsedLine {
    offset: usize,
    event: StructuredEvent,
}

/// Structured-protocol adapter (Claude Code).
#[derive(Debug, Clone)]
pub struct StructuredAdapter {
    settings: AdapterSettings,
}

impl StructuredAdapter {
    /// Create an adapter with resolved settings.
    #[must_use]
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    /// Launch a login shell and type the agent command once it settles.
    ///
    /// With `resuming`, the conversation id is passed as `--resume`;
    /// otherwise a supplied id pins the new conversation via `--session-id`.
    #[must_use]
    pub fn build_spawn_config(&self, params: &SpawnParams<'_>) -> SpawnConfig {
        let (command, args) = resolve_shell(&self.settings, params.shell_override);

        let mut line = self.settings.claude_command.clone();
        match (params.conversation_id, params.resuming) {
            (Some(id), true) => {
                line.push_str(" --resume ");
                line.push_str(&shell_quote(id));
            }
            (Some(id), false) => {
                line.push_str(" --session-id ");
                line.push_str(&shell_quote(id));
            }
            (None, _) => {}
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

    /// First permission, question, or input request in the chunk.
    #[must_use]
    pub fn detect_prompt(&self, chunk: &[u8]) -> Option<PromptInfo> {
        prompt_of(&parse_lines(chunk))
    }

    /// First decodable event in the chunk.
    #[must_use]
    pub fn parse_event(&self, chunk: &[u8]) -> Option<StructuredEvent> {
        parse_lines(chunk).into_iter().next().map(|line| line.event)
    }

    /// State implied by the last mapped event in the chunk.
    #[must_use]
    pub fn detect_state(&self, chunk: &[u8], _current: TerminalState) -> Option<TerminalState> {
        state_of(&parse_lines(chunk))
    }

    /// `session_id` announced by any event in the chunk.
    #[must_use]
    pub fn detect_conversation_id(&self, chunk: &[u8]) -> Option<String> {
        conversation_id_of(&parse_lines(chunk))
    }

    /// All detectors over a single parse of the chunk.
    #[must_use]
    pub fn classify(&self, chunk: &[u8], _current: TerminalState) -> Classification {
        let lines = parse_lines(chunk);
        Classification {
            state: state_of(&lines),
            prompt: prompt_of(&lines),
            conversation_id: conversation_id_of(&lines),
            events: lines.into_iter().map(|line| line.event).collect(),
        }
    }
}

/// Map an event type to the state it implies.
#[must_use]
pub fn state_for_event_type(event_type: &str) -> Option<TerminalState> {
    match event_type {
        "thinking" | "reasoning" | "tool_use" | "tool_result" | "assistant"
        | "assistant_message" | "text" => Some(TerminalState::Running),
        "input_request" | "permission_request" | "question" => Some(TerminalState::AwaitingInput),
        "error" => Some(TerminalState::Error),
        "result" | "done" => Some(TerminalState::Idle),
        other => {
            debug!(event_type = other, "structured adapter: unknown event type");
            None
        }
    }
}

fn parse_lines(chunk: &[u8]) -> Vec<ParsedLine> {
    let mut parsed = Vec::new();
    let mut offset = 0;

    for raw in chunk.split(|&b| b == b'\n') {
        let line_offset = offset;
        offset += raw.len() + 1;

        let trimmed = raw.trim_ascii();
        if trimmed.first() != Some(&b'{') {
            continue;
        }

        let Ok(payload) = serde_json::from_slice::<Value>(trimmed) else {
            continue;
        };
        let Some(event_type) = payload.get("type").and_then(Value::as_str) else {
            continue;
        };

        parsed.push(ParsedLine {
            offset: line_offset,
            event: StructuredEvent {
                event_type: event_type.to_owned(),
                payload,
            },
        });
    }

    parsed
}

fn state_of(lines: &[ParsedLine]) -> Option<TerminalState> {
    lines
        .iter()
        .filter_map(|line| state_for_event_type(&line.event.event_type))
        .last()
}

fn prompt_of(lines: &[ParsedLine]) -> Option<PromptInfo> {
    lines.iter().find_map(|line| {
        let kind = match line.event.event_type.as_str() {
            "permission_request" => PromptKind::Permission,
            "question" => PromptKind::Question,
            "input_request" => PromptKind::Input,
            _ => return None,
        };
        let text = ["message", "text", "prompt", "question"]
            .iter()
            .find_map(|key| line.event.payload.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_owned();
        Some(PromptInfo {
            kind,
            text,
            position: line.offset,
        })
    })
}

fn conversation_id_of(lines: &[ParsedLine]) -> Option<String> {
    lines.iter().find_map(|line| {
        line.event
            .payload
            .get("session_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
    })
}
