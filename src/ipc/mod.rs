//! Line-delimited JSON control bridge.
//!
//! Exposes the session manager's commands and event stream to a UI process
//! over any byte stream (stdio for the `agentmux` binary, in-memory pipes in
//! tests).

pub mod codec;
pub mod server;

pub use codec::{event_message, EventEncoder};
pub use server::serve;
