//! Structured agent event model.

use serde::{Deserialize, Serialize};

/// A typed event decoded from an agent that speaks a structured wire format.
///
/// The payload is kept opaque; only the `event_type` tag drives state
/// classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StructuredEvent {
    /// Value of the `type` field on the wire.
    pub event_type: String,
    /// The complete decoded JSON object.
    pub payload: serde_json::Value,
}
