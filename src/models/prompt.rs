//! Prompt detection model.

use serde::{Deserialize, Serialize};

/// Classification of a prompt the agent is showing to the user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Agent is asking permission to run a tool or touch a file.
    Permission,
    /// Agent asked a free-form question.
    Question,
    /// Agent is waiting for the next instruction.
    Input,
}

/// A prompt extracted from a chunk of agent output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PromptInfo {
    /// Prompt classification.
    pub kind: PromptKind,
    /// Human-readable prompt text.
    pub text: String,
    /// Byte offset of the prompt within the output it was classified from.
    /// For line-oriented agents that is the run of whole lines the chunk
    /// completed, not the raw read.
    pub position: usize,
}
