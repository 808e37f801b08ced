//! Session event types and the publish/subscribe hub that delivers them.
//!
//! Every event carries the `generation` of the process instance that
//! produced it. The session manager drops stale generations before they
//! reach the hub, so subscribers never see output from a superseded or
//! killed process.

pub mod hub;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::models::event::StructuredEvent;
use crate::models::prompt::PromptInfo;
use crate::models::session::TerminalState;

pub use hub::{EventHub, Scope, Subscription};

/// Event categories; each category is its own channel in the hub.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Raw output chunk.
    Data,
    /// Process exited or was reaped.
    Exit,
    /// A resume attempt referenced a conversation the agent does not know.
    SessionNotFound,
    /// Session hibernated; presentation resources may be released.
    Idle,
    /// Terminal state transition.
    StateChange,
    /// Agent is prompting the user.
    Prompt,
    /// Conversation id discovered or assigned.
    SessionDetected,
    /// Structured event decoded by the adapter.
    Structured,
}

impl EventKind {
    /// Every category, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Data,
        Self::Exit,
        Self::SessionNotFound,
        Self::Idle,
        Self::StateChange,
        Self::Prompt,
        Self::SessionDetected,
        Self::Structured,
    ];
}

/// An event addressed to subscribers of one session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Raw output from the process, in emission order.
    Data {
        /// Session id.
        id: String,
        /// Generation that produced the chunk.
        generation: u64,
        /// Output bytes.
        chunk: Bytes,
    },
    /// Process exit.
    Exit {
        /// Session id.
        id: String,
        /// Generation that exited.
        generation: u64,
        /// OS exit code; `-1` when it could not be determined.
        exit_code: i32,
    },
    /// Resume failed because the conversation id is unknown to the agent.
    SessionNotFound {
        /// Session id.
        id: String,
        /// Generation that attempted the resume.
        generation: u64,
    },
    /// Session hibernated by the idle monitor.
    Idle {
        /// Session id.
        id: String,
        /// Generation that went idle.
        generation: u64,
    },
    /// Terminal state changed.
    StateChange {
        /// Session id.
        id: String,
        /// Generation whose state changed.
        generation: u64,
        /// State after the transition.
        new_state: TerminalState,
        /// State before the transition.
        old_state: TerminalState,
    },
    /// Prompt detected in the output.
    Prompt {
        /// Session id.
        id: String,
        /// Generation that prompted.
        generation: u64,
        /// Prompt details.
        prompt: PromptInfo,
    },
    /// Conversation id discovered mid-stream or assigned at spawn.
    SessionDetected {
        /// Session id.
        id: String,
        /// Generation the id belongs to.
        generation: u64,
        /// Agent conversation id.
        conversation_id: String,
    },
    /// Structured event decoded from the output.
    Structured {
        /// Session id.
        id: String,
        /// Generation that emitted the event.
        generation: u64,
        /// Decoded event.
        event: StructuredEvent,
    },
}

impl SessionEvent {
    /// Category this event is delivered on.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Data { .. } => EventKind::Data,
            Self::Exit { .. } => EventKind::Exit,
            Self::SessionNotFound { .. } => EventKind::SessionNotFound,
            Self::Idle { .. } => EventKind::Idle,
            Self::StateChange { .. } => EventKind::StateChange,
            Self::Prompt { .. } => EventKind::Prompt,
            Self::SessionDetected { .. } => EventKind::SessionDetected,
            Self::Structured { .. } => EventKind::Structured,
        }
    }

    /// Session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Data { id, .. }
            | Self::Exit { id, .. }
            | Self::SessionNotFound { id, .. }
            | Self::Idle { id, .. }
            | Self::StateChange { id, .. }
            | Self::Prompt { id, .. }
            | Self::SessionDetected { id, .. }
            | Self::Structured { id, .. } => id,
        }
    }

    /// Generation that produced the event.
    #[must_use]
    pub fn generation(&self) -> u64 {
        match self {
            Self::Data { generation, .. }
            | Self::Exit { generation, .. }
            | Self::SessionNotFound { generation, .. }
            | Self::Idle { generation, .. }
            | Self::StateChange { generation, .. }
            | Self::Prompt { generation, .. }
            | Self::SessionDetected { generation, .. }
            | Self::Structured { generation, .. } => *generation,
        }
    }
}
