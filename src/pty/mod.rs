//! Pseudo-terminal process seam.
//!
//! The session manager never talks to the OS directly: it asks a
//! [`PtySpawner`] for a [`SpawnedProcess`] and drives it through the
//! [`PtyProcess`] handle plus two channels (output chunks and the exit
//! code). [`native::NativePtySpawner`] is the production implementation;
//! tests substitute scripted processes.

pub mod native;

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::Result;

pub use native::NativePtySpawner;

/// Fully resolved request to start one process under a pty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtySpawnRequest {
    /// Session id, for logging only.
    pub session_id: String,
    /// Program to execute.
    pub command: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Working directory; must exist.
    pub cwd: PathBuf,
    /// Environment overrides.
    pub env: HashMap<String, String>,
    /// Initial terminal width.
    pub cols: u16,
    /// Initial terminal height.
    pub rows: u16,
}

/// Control handle for a running pty process.
///
/// Every method returns as soon as the request is handed to the OS (or to
/// an I/O thread); none of them wait on process output.
pub trait PtyProcess: Send + Sync {
    /// OS process id, when known.
    fn pid(&self) -> Option<u32>;

    /// Queue bytes for the process's input.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pty`](crate::AppError::Pty) if the input side is closed.
    fn write(&self, data: Bytes) -> Result<()>;

    /// Change the terminal dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pty`](crate::AppError::Pty) if the resize ioctl fails.
    fn resize(&self, cols: u16, rows: u16) -> Result<()>;

    /// Terminate the process and everything it spawned.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pty`](crate::AppError::Pty) if no signal could be delivered.
    fn kill(&self) -> Result<()>;
}

/// A started process and its output plumbing.
pub struct SpawnedProcess {
    /// Control handle.
    pub process: Box<dyn PtyProcess>,
    /// Output chunks in emission order; closes when the pty reaches EOF.
    pub output: mpsc::UnboundedReceiver<Bytes>,
    /// Resolves with the exit code once the process has been reaped.
    pub exit: oneshot::Receiver<i32>,
}

/// Starts processes attached to a pseudo-terminal.
pub trait PtySpawner: Send + Sync {
    /// Start the process described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`](crate::AppError::Spawn) if the working
    /// directory is invalid, the pty cannot be opened, or the program
    /// cannot be executed.
    fn spawn(&self, request: &PtySpawnRequest) -> Result<SpawnedProcess>;
}
