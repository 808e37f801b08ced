//! Session orchestration modules.
//!
//! Covers the session registry and its generation-tagged dispatch, the
//! per-session replay buffer and line reassembly, stale resume detection, and the idle sweep.

pub mod idle_monitor;
pub mod line_assembler;
pub mod replay_buffer;
pub(crate) mod session;
pub mod session_manager;
pub mod stale_resume;
