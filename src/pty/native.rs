//! `portable-pty` backed process spawner.
//!
//! Each process gets three dedicated OS threads: a reader that forwards raw
//! chunks, a writer fed by an unbounded channel so callers never block on
//! the pty, and a waiter that reaps the child and reports its exit code.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
#[cfg(unix)]
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{PtyProcess, PtySpawnRequest, PtySpawner, SpawnedProcess};
use crate::{AppError, Result};

/// Read buffer size for the output thread.
const READ_CHUNK_BYTES: usize = 8192;

/// Time the process group gets to honour `SIGHUP` before `SIGKILL`.
#[cfg(unix)]
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Spawner backed by the platform's native pty implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePtySpawner;

impl NativePtySpawner {
    /// Create a spawner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PtySpawner for NativePtySpawner {
    fn spawn(&self, request: &PtySpawnRequest) -> Result<SpawnedProcess> {
        if !request.cwd.is_dir() {
            return Err(AppError::Spawn(format!(
                "working directory does not exist: {}",
                request.cwd.display()
            )));
        }

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| AppError::Spawn(format!("failed to open pty: {err}")))?;

        let mut cmd = CommandBuilder::new(&request.command);
        cmd.args(&request.args);
        cmd.cwd(&request.cwd);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(|err| {
            AppError::Spawn(format!("failed to spawn {}: {err}", request.command))
        })?;
        // The slave end must close in this process so the reader sees EOF
        // once the child is gone.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let exited = Arc::new(AtomicBool::new(false));

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| AppError::Spawn(format!("failed to clone pty reader: {err}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| AppError::Spawn(format!("failed to take pty writer: {err}")))?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        spawn_thread(&request.session_id, "reader", move || {
            read_loop(reader, &output_tx);
        })?;

        spawn_thread(&request.session_id, "writer", move || {
            write_loop(writer, input_rx);
        })?;

        let wait_exited = Arc::clone(&exited);
        let wait_session = request.session_id.clone();
        spawn_thread(&request.session_id, "waiter", move || {
            let code = match child.wait() {
                Ok(status) => i32::try_from(status.exit_code()).unwrap_or(-1),
                Err(err) => {
                    warn!(session_id = wait_session, %err, "failed to wait for pty child");
                    -1
                }
            };
            wait_exited.store(true, Ordering::SeqCst);
            debug!(session_id = wait_session, code, "pty child reaped");
            let _ = exit_tx.send(code);
        })?;

        info!(
            session_id = request.session_id,
            pid = pid.unwrap_or(0),
            command = request.command,
            "pty process spawned"
        );

        Ok(SpawnedProcess {
            process: Box::new(NativePtyProcess {
                session_id: request.session_id.clone(),
                pid,
                master: Mutex::new(pair.master),
                killer: Mutex::new(killer),
                input: input_tx,
                exited,
            }),
            output: output_rx,
            exit: exit_rx,
        })
    }
}

/// Handle for a process started by [`NativePtySpawner`].
struct NativePtyProcess {
    session_id: String,
    pid: Option<u32>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    input: mpsc::UnboundedSender<Bytes>,
    exited: Arc<AtomicBool>,
}

impl PtyProcess for NativePtyProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&self, data: Bytes) -> Result<()> {
        self.input
            .send(data)
            .map_err(|_| AppError::Pty("pty input closed".into()))
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| AppError::Pty(format!("resize failed: {err}")))
    }

    fn kill(&self) -> Result<()> {
        if self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }

        #[cfg(unix)]
        let group_signalled = self.signal_group();
        #[cfg(not(unix))]
        let group_signalled = false;

        match self.killer.lock().kill() {
            Ok(()) => Ok(()),
            Err(_) if group_signalled => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!(session_id = self.session_id, %err, "failed to kill pty child");
                Err(AppError::Pty(format!("kill failed: {err}")))
            }
        }
    }
}

#[cfg(unix)]
impl NativePtyProcess {
    /// Hang up the child's process group, escalating to `SIGKILL` after
    /// [`KILL_GRACE`] if the child is still alive.
    ///
    /// The child is a session leader (the pty makes it one), so its pid is
    /// also its process-group id.
    fn signal_group(&self) -> bool {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return false;
        };
        let pgid = Pid::from_raw(pgid);

        if let Err(err) = killpg(pgid, Signal::SIGHUP) {
            debug!(session_id = self.session_id, %err, "SIGHUP to process group failed");
            return false;
        }

        let exited = Arc::clone(&self.exited);
        let session_id = self.session_id.clone();
        let escalate = thread::Builder::new()
            .name(format!("pty-reaper-{session_id}"))
            .spawn(move || {
                thread::sleep(KILL_GRACE);
                if !exited.load(Ordering::SeqCst) {
                    warn!(session_id, "process group ignored SIGHUP, sending SIGKILL");
                    let _ = killpg(pgid, Signal::SIGKILL);
                }
            });
        if let Err(err) = escalate {
            warn!(session_id = self.session_id, %err, "failed to start kill escalation thread");
        }

        true
    }
}

fn spawn_thread<F>(session_id: &str, role: &str, body: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("pty-{role}-{session_id}"))
        .spawn(body)
        .map(|_| ())
        .map_err(|err| AppError::Spawn(format!("failed to start pty {role} thread: {err}")))
}

fn read_loop(mut reader: Box<dyn Read + Send>, output: &mpsc::UnboundedSender<Bytes>) {
    let mut buf = [0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if output.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                    break;
                }
            }
            Err(ref err) if err.kind() == ErrorKind::Interrupted => {}
            // EIO is how Linux reports a hung-up pty; treat every error as EOF.
            Err(_) => break,
        }
    }
}

fn write_loop(mut writer: Box<dyn Write + Send>, mut input: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(bytes) = input.blocking_recv() {
        if let Err(err) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
            debug!(%err, "pty writer stopped");
            break;
        }
    }
}
