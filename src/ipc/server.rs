//! Control bridge between a UI process and the [`SessionManager`].
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "create", "id": "wi-1", "cwd": "/repo", "mode": "claude_code"}
//! {"command": "write", "id": "wi-1", "data": "hello\r"}
//! {"command": "resize", "id": "wi-1", "cols": 120, "rows": 40}
//! {"command": "kill", "id": "wi-1"}
//! {"command": "exists", "id": "wi-1"}
//! {"command": "get_buffer", "id": "wi-1"}
//! {"command": "get_state", "id": "wi-1"}
//! {"command": "list"}
//! ```
//!
//! Response (one JSON object per line, in request order):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not found: wi-9"}
//! ```
//!
//! Events for every session are interleaved on the same stream:
//! ```json
//! {"event": "state_change", "id": "wi-1", "generation": 3, "new_state": "running", "old_state": "starting"}
//! ```
//!
//! Output chunks travel as UTF-8 text, decoded as a stream per session.

use std::path::PathBuf;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::{EventEncoder, MAX_LINE_BYTES};
use crate::events::{EventKind, Scope, Subscription};
use crate::models::session::TerminalMode;
use crate::orchestrator::session_manager::{CreateSessionRequest, SessionManager};
use crate::{AppError, Result};

/// Outbound lines queued before event forwarding applies backpressure.
const OUTBOUND_CAPACITY: usize = 1024;

/// Inbound bridge request.
#[derive(Debug, Deserialize)]
struct IpcRequest {
    /// Command verb.
    command: String,
    /// Session id.
    id: Option<String>,
    /// Working directory (for `create`).
    cwd: Option<PathBuf>,
    /// Agent mode (for `create`).
    mode: Option<TerminalMode>,
    /// Conversation to resume (for `create`).
    resume_id: Option<String>,
    /// Id to pin a new conversation to (for `create`).
    fresh_session_id: Option<String>,
    /// Shell override (for `create`).
    shell: Option<String>,
    /// Prompt handed to the agent on launch (for `create`).
    initial_prompt: Option<String>,
    /// Input text (for `write`).
    data: Option<String>,
    /// Terminal width (for `resize`).
    cols: Option<u16>,
    /// Terminal height (for `resize`).
    rows: Option<u16>,
}

/// Outbound bridge response.
#[derive(Debug, Serialize)]
struct IpcResponse {
    /// Whether the command succeeded.
    ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IpcResponse {
    fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Serve bridge requests from `reader` and write responses and events to
/// `writer` until the input closes or `cancel` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if the input stream fails or the output stream
/// can no longer be written.
pub async fn serve<R, W>(
    manager: SessionManager,
    reader: R,
    writer: W,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(run_writer(writer, out_rx).instrument(info_span!("ipc_writer")));

    let forward_cancel = cancel.child_token();
    let subscription = manager.events().subscribe(Scope::All, &EventKind::ALL);
    let forward_task = tokio::spawn(
        forward_events(subscription, out_tx.clone(), forward_cancel.clone())
            .instrument(info_span!("ipc_events")),
    );

    let outcome = read_requests(&manager, reader, &out_tx, &cancel)
        .instrument(info_span!("ipc_conn"))
        .await;

    forward_cancel.cancel();
    let _ = forward_task.await;
    drop(out_tx);

    let written = match writer_task.await {
        Ok(result) => result,
        Err(err) => Err(AppError::Ipc(format!("writer task failed: {err}"))),
    };

    info!("ipc bridge closed");
    outcome.and(written)
}

async fn read_requests<R>(
    manager: &SessionManager,
    reader: R,
    out_tx: &mpsc::Sender<String>,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    loop {
        let frame = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("ipc reader: cancellation received, stopping");
                return Ok(());
            }

            frame = frames.next() => frame,
        };

        let response = match frame {
            None => return Ok(()),
            Some(Ok(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<IpcRequest>(trimmed) {
                    Ok(request) => dispatch_command(&request, manager).await,
                    Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                }
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!(limit = MAX_LINE_BYTES, "ipc reader: rejecting oversized request");
                IpcResponse::error(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
            }
            Some(Err(LinesCodecError::Io(err))) => return Err(err.into()),
        };

        let line = serde_json::to_string(&response)
            .unwrap_or_else(|_| r#"{"ok":false,"error":"serialization failed"}"#.to_owned());
        if out_tx.send(line).await.is_err() {
            return Err(AppError::Io("ipc output closed".into()));
        }
    }
}

/// Route one request to the manager.
async fn dispatch_command(request: &IpcRequest, manager: &SessionManager) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    async move {
        if request.command == "list" {
            return match serde_json::to_value(manager.list().await) {
                Ok(sessions) => IpcResponse::success(json!({ "sessions": sessions })),
                Err(err) => IpcResponse::error(format!("failed to encode sessions: {err}")),
            };
        }

        let Some(id) = request.id.as_deref() else {
            return IpcResponse::error("missing required 'id' field");
        };

        match request.command.as_str() {
            "create" => handle_create(request, id, manager).await,
            "write" => {
                let Some(data) = request.data.as_deref() else {
                    return IpcResponse::error("missing required 'data' field");
                };
                let delivered = manager.write(id, data.as_bytes().to_vec()).await;
                IpcResponse::success(json!({ "delivered": delivered }))
            }
            "resize" => {
                let (Some(cols), Some(rows)) = (request.cols, request.rows) else {
                    return IpcResponse::error("missing required 'cols'/'rows' fields");
                };
                let resized = manager.resize(id, cols, rows).await;
                IpcResponse::success(json!({ "resized": resized }))
            }
            "kill" => {
                let killed = manager.kill(id).await;
                IpcResponse::success(json!({ "killed": killed }))
            }
            "exists" => IpcResponse::success(json!({ "exists": manager.exists(id).await })),
            "get_buffer" => match manager.get_buffer(id).await {
                Some(buffer) => IpcResponse::success(json!({
                    "buffer": String::from_utf8_lossy(&buffer),
                })),
                None => IpcResponse::error(AppError::NotFound(id.to_owned()).to_string()),
            },
            "get_state" => match manager.get_state(id).await {
                Some(state) => IpcResponse::success(json!({ "state": state })),
                None => IpcResponse::error(AppError::NotFound(id.to_owned()).to_string()),
            },
            other => IpcResponse::error(format!("unknown command: {other}")),
        }
    }
    .instrument(span)
    .await
}

async fn handle_create(request: &IpcRequest, id: &str, manager: &SessionManager) -> IpcResponse {
    let Some(cwd) = request.cwd.clone() else {
        return IpcResponse::error("missing required 'cwd' field");
    };
    let Some(mode) = request.mode else {
        return IpcResponse::error("missing required 'mode' field");
    };

    let mut create = CreateSessionRequest::new(id, cwd, mode);
    create.resume_id.clone_from(&request.resume_id);
    create.fresh_session_id.clone_from(&request.fresh_session_id);
    create.shell_override.clone_from(&request.shell);
    create.initial_prompt.clone_from(&request.initial_prompt);

    match manager.create(create).await {
        Ok(()) => IpcResponse::success(json!({ "id": id })),
        Err(err) => {
            warn!(session_id = id, %err, "create failed");
            IpcResponse::error(err.to_string())
        }
    }
}

async fn forward_events(
    mut subscription: Subscription,
    out_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let mut encoder = EventEncoder::new();
    loop {
        let event = tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            event = subscription.recv() => event,
        };

        let Some(event) = event else {
            break;
        };
        if out_tx.send(encoder.encode(&event).to_string()).await.is_err() {
            debug!("ipc events: output closed, stopping");
            break;
        }
    }
}

/// Write queued lines as NDJSON until every sender is dropped.
async fn run_writer<W>(mut writer: W, mut out_rx: mpsc::Receiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = out_rx.recv().await {
        line.push('\n');
        writer.write_all(line.as_bytes()).await.map_err(|err| {
            warn!(%err, "ipc writer: write failed");
            AppError::Io(format!("write failed: {err}"))
        })?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}
