//! Bridge message encoding.
//!
//! Requests are framed by a length-limited `LinesCodec` in
//! [`serve`](super::serve). This module covers the outbound direction:
//! turning [`SessionEvent`]s into JSON messages. Output chunks are decoded
//! as a UTF-8 stream per session, so a character split across two pty
//! reads reaches the client whole.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::events::SessionEvent;

/// Maximum accepted request line: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Incremental UTF-8 decoder that holds back an incomplete trailing
/// sequence until the next chunk.
///
/// Invalid bytes become U+FFFD; a truncated sequence at the end of a chunk
/// does not.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    carry: Vec<u8>,
}

impl Utf8Stream {
    /// Decode `chunk`, prefixed by whatever the previous call held back.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(chunk);

        let mut text = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Bytes held back waiting for the rest of a character.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }
}

/// Stateful event encoder for one bridge connection.
///
/// Keeps one [`Utf8Stream`] per session generation and forgets it when the
/// session exits or is replaced.
#[derive(Debug, Default)]
pub struct EventEncoder {
    streams: HashMap<String, (u64, Utf8Stream)>,
}

impl EventEncoder {
    /// Create an encoder with no session state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `event` as a bridge message.
    pub fn encode(&mut self, event: &SessionEvent) -> Value {
        match event {
            SessionEvent::Data {
                id,
                generation,
                chunk,
            } => {
                let entry = self
                    .streams
                    .entry(id.clone())
                    .or_insert_with(|| (*generation, Utf8Stream::default()));
                if entry.0 != *generation {
                    *entry = (*generation, Utf8Stream::default());
                }
                let text = entry.1.decode(chunk);
                with_fields(event, json!({ "data": text }))
            }
            SessionEvent::Exit { id, .. } => {
                self.streams.remove(id);
                event_message(event)
            }
            _ => event_message(event),
        }
    }
}

/// Encode a single event with no stream state. Output chunks are decoded
/// lossily on their own.
#[must_use]
pub fn event_message(event: &SessionEvent) -> Value {
    let fields = match event {
        SessionEvent::Data { chunk, .. } => json!({ "data": String::from_utf8_lossy(chunk) }),
        SessionEvent::Exit { exit_code, .. } => json!({ "exit_code": exit_code }),
        SessionEvent::StateChange {
            new_state,
            old_state,
            ..
        } => json!({ "new_state": new_state, "old_state": old_state }),
        SessionEvent::Prompt { prompt, .. } => json!({ "prompt": prompt }),
        SessionEvent::SessionDetected {
            conversation_id, ..
        } => json!({ "conversation_id": conversation_id }),
        SessionEvent::Structured { event, .. } => json!({ "payload": event }),
        SessionEvent::SessionNotFound { .. } | SessionEvent::Idle { .. } => Value::Null,
    };
    with_fields(event, fields)
}

fn with_fields(event: &SessionEvent, fields: Value) -> Value {
    let mut message = json!({
        "event": event.kind(),
        "id": event.session_id(),
        "generation": event.generation(),
    });
    if let (Value::Object(message), Value::Object(fields)) = (&mut message, fields) {
        message.extend(fields);
    }
    message
}
