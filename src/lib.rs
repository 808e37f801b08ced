#![forbid(unsafe_code)]

//! PTY session multiplexer for long-running interactive agent CLIs.
//!
//! One [`SessionManager`] owns a pseudo-terminal process per work item,
//! classifies its output through a per-mode adapter, keeps a bounded replay
//! buffer, and fans typed events out to subscribers.

pub mod adapter;
pub mod config;
pub mod errors;
pub mod events;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod pty;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use orchestrator::session_manager::SessionManager;
