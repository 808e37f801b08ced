//! Session registry and lifecycle: create, write, resize, kill, observe.
//!
//! The [`SessionManager`] owns exactly one [`Session`] per work-item id.
//! Three actors touch the registry concurrently: commands from the UI
//! boundary, per-process output pumps, and the idle monitor. All of them go
//! through one async mutex, and events are published while it is held, so:
//!
//! - once [`SessionManager::kill`] returns, no `data`/`exit` event for that
//!   id is ever published for the killed process;
//! - output from a replaced process carries an older generation and is
//!   dropped at dispatch, whatever the timing of its kill signal;
//! - a state change caused by a chunk is published before the chunk itself.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::line_assembler::LineAssembler;
use super::session::Session;
use super::stale_resume::{self, StaleResumeCheck};
use crate::adapter::{Adapter, AdapterSettings, SpawnParams};
use crate::config::GlobalConfig;
use crate::events::{EventHub, EventKind, Scope, SessionEvent, Subscription};
use crate::models::session::{Presentation, SessionSnapshot, TerminalMode, TerminalState};
use crate::orchestrator::replay_buffer::ReplayBuffer;
use crate::pty::{NativePtySpawner, PtySpawnRequest, PtySpawner, SpawnedProcess};
use crate::{AppError, Result};

/// How long the pump keeps draining output after the exit code arrives.
const EXIT_DRAIN: Duration = Duration::from_millis(250);

/// Tuning values the manager needs at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Replay buffer ceiling per session.
    pub buffer_max_bytes: usize,
    /// Delay before a post-spawn command is written. The shell is assumed
    /// ready after this grace period; nothing verifies it.
    pub settle_delay: Duration,
    /// Window after a resume attempt in which the not-found text is checked.
    pub stale_session_window: Duration,
    /// Initial terminal width.
    pub cols: u16,
    /// Initial terminal height.
    pub rows: u16,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        GlobalConfig::default().manager_config()
    }
}

/// Parameters for [`SessionManager::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionRequest {
    /// Work-item id.
    pub id: String,
    /// Working directory.
    pub cwd: PathBuf,
    /// Agent mode.
    pub mode: TerminalMode,
    /// Conversation to resume.
    pub resume_id: Option<String>,
    /// Id to pin a new conversation to.
    pub fresh_session_id: Option<String>,
    /// Shell to use instead of the configured default.
    pub shell_override: Option<String>,
    /// Prompt handed to the agent on launch.
    pub initial_prompt: Option<String>,
}

impl CreateSessionRequest {
    /// Request with no resume id, fresh id, shell override, or prompt.
    #[must_use]
    pub fn new(id: impl Into<String>, cwd: impl Into<PathBuf>, mode: TerminalMode) -> Self {
        Self {
            id: id.into(),
            cwd: cwd.into(),
            mode,
            resume_id: None,
            fresh_session_id: None,
            shell_override: None,
            initial_prompt: None,
        }
    }

    /// Resume an existing conversation.
    #[must_use]
    pub fn with_resume_id(mut self, resume_id: impl Into<String>) -> Self {
        self.resume_id = Some(resume_id.into());
        self
    }

    /// Pin a new conversation to `fresh_session_id`.
    #[must_use]
    pub fn with_fresh_session_id(mut self, fresh_session_id: impl Into<String>) -> Self {
        self.fresh_session_id = Some(fresh_session_id.into());
        self
    }

    /// Use `shell` instead of the configured default.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell_override = Some(shell.into());
        self
    }

    /// Hand `prompt` to the agent on launch.
    #[must_use]
    pub fn with_initial_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.initial_prompt = Some(prompt.into());
        self
    }
}

/// Conversation id decision for one create call.
struct ConversationPlan {
    id: Option<String>,
    resuming: bool,
    assigned: bool,
}

impl ConversationPlan {
    fn for_request(request: &CreateSessionRequest) -> Self {
        let none = Self {
            id: None,
            resuming: false,
            assigned: false,
        };
        if !request.mode.supports_resume() {
            return none;
        }
        if let Some(id) = non_empty(request.resume_id.as_deref()) {
            return Self {
                id: Some(id.to_owned()),
                resuming: true,
                assigned: false,
            };
        }
        if !request.mode.pins_conversation_id() {
            return none;
        }
        match non_empty(request.fresh_session_id.as_deref()) {
            Some(id) => Self {
                id: Some(id.to_owned()),
                resuming: false,
                assigned: false,
            },
            None => Self {
                id: Some(Uuid::new_v4().to_string()),
                resuming: false,
                assigned: true,
            },
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

struct ManagerInner {
    config: ManagerConfig,
    settings: AdapterSettings,
    spawner: Arc<dyn PtySpawner>,
    hub: EventHub,
    sessions: Mutex<HashMap<String, Session>>,
    next_generation: AtomicU64,
    cancel: CancellationToken,
}

/// Registry of live sessions. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Create a manager that spawns processes through `spawner`.
    #[must_use]
    pub fn new(config: ManagerConfig, settings: AdapterSettings, spawner: Arc<dyn PtySpawner>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                settings,
                spawner,
                hub: EventHub::new(),
                sessions: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Create a manager from global configuration using native ptys.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(
            config.manager_config(),
            config.adapter_settings(),
            Arc::new(NativePtySpawner::new()),
        )
    }

    /// Event hub that carries this manager's events.
    #[must_use]
    pub fn events(&self) -> &EventHub {
        &self.inner.hub
    }

    /// Start a session for `request.id`, replacing any live one.
    ///
    /// The previous process (if any) is killed first and its generation
    /// invalidated, so none of its remaining output is delivered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the id is empty or the process cannot be
    /// started. No registry entry remains for `request.id` in that case.
    pub async fn create(&self, request: CreateSessionRequest) -> Result<()> {
        let span = info_span!(
            "create_session",
            session_id = %request.id,
            generation = tracing::field::Empty,
            mode = ?request.mode
        );
        self.create_generation(request).instrument(span).await
    }

    async fn create_generation(&self, request: CreateSessionRequest) -> Result<()> {
        if request.id.trim().is_empty() {
            return Err(AppError::Spawn("session id must not be empty".into()));
        }

        // The generation is taken under the registry lock, so any entry seen
        // here (or later, by this create) with a lower generation is older.
        let generation = {
            let mut sessions = self.inner.sessions.lock().await;
            let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::Span::current().record("generation", generation);
            if let Some(previous) = sessions.remove(&request.id) {
                info!(
                    previous_generation = previous.generation,
                    "replacing live session"
                );
                terminate(&previous);
            }
            generation
        };

        let plan = ConversationPlan::for_request(&request);
        let adapter = Adapter::for_mode(request.mode, &self.inner.settings);
        let spawn_config = adapter.build_spawn_config(&SpawnParams {
            cwd: &request.cwd,
            conversation_id: plan.id.as_deref(),
            resuming: plan.resuming,
            shell_override: request.shell_override.as_deref(),
            initial_prompt: request.initial_prompt.as_deref(),
        });

        let pty_request = PtySpawnRequest {
            session_id: request.id.clone(),
            command: spawn_config.command,
            args: spawn_config.args,
            cwd: spawn_config.cwd,
            env: spawn_config.env,
            cols: self.inner.config.cols,
            rows: self.inner.config.rows,
        };
        let spawner = Arc::clone(&self.inner.spawner);
        let SpawnedProcess {
            process,
            output,
            exit,
        } = tokio::task::spawn_blocking(move || spawner.spawn(&pty_request))
            .await
            .map_err(|err| AppError::Spawn(format!("spawn task failed: {err}")))??;

        let pid = process.pid();
        let now = Instant::now();
        let session = Session {
            id: request.id.clone(),
            mode: request.mode,
            generation,
            conversation_id: plan.id.clone(),
            state: TerminalState::Starting,
            presentation: Presentation::Attached,
            buffer: ReplayBuffer::new(self.inner.config.buffer_max_bytes),
            lines: LineAssembler::default(),
            last_output_at: now,
            last_output_wall: Utc::now(),
            stale_check: plan
                .resuming
                .then(|| StaleResumeCheck::until(now + self.inner.config.stale_session_window)),
            adapter,
            process,
        };

        {
            let mut sessions = self.inner.sessions.lock().await;
            if let Some(existing) = sessions.remove(&request.id) {
                if existing.generation > generation {
                    // A later create for the same id won the race; it stays.
                    info!(
                        winner_generation = existing.generation,
                        "superseded by a newer create"
                    );
                    terminate(&session);
                    sessions.insert(request.id.clone(), existing);
                    return Ok(());
                }
                info!(
                    previous_generation = existing.generation,
                    "replacing session created concurrently"
                );
                terminate(&existing);
            }
            sessions.insert(request.id.clone(), session);

            if let (true, Some(conversation_id)) = (plan.assigned, plan.id.clone()) {
                self.inner.hub.publish(&SessionEvent::SessionDetected {
                    id: request.id.clone(),
                    generation,
                    conversation_id,
                });
            }
        }

        tokio::spawn(pump(
            Arc::downgrade(&self.inner),
            request.id.clone(),
            generation,
            output,
            exit,
            self.inner.cancel.child_token(),
        ));

        if let Some(line) = spawn_config.post_spawn_command {
            let inner = Arc::downgrade(&self.inner);
            let delay = self.inner.config.settle_delay;
            let id = request.id.clone();
            tokio::spawn(
                async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = inner.upgrade() {
                        let mut bytes = line.into_bytes();
                        bytes.push(b'\r');
                        inner.write_for_generation(&id, generation, Bytes::from(bytes)).await;
                    }
                }
                .in_current_span(),
            );
        }

        info!(resuming = plan.resuming, pid = ?pid, "session created");
        Ok(())
    }

    /// Queue `data` for the session's input. `false` if no live session.
    pub async fn write(&self, id: &str, data: impl Into<Bytes>) -> bool {
        let sessions = self.inner.sessions.lock().await;
        let Some(session) = sessions.get(id) else {
            return false;
        };
        match session.process.write(data.into()) {
            Ok(()) => true,
            Err(err) => {
                warn!(session_id = id, %err, "write to session failed");
                false
            }
        }
    }

    /// Resize the session's terminal. `false` if no live session.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> bool {
        let sessions = self.inner.sessions.lock().await;
        let Some(session) = sessions.get(id) else {
            return false;
        };
        match session.process.resize(cols, rows) {
            Ok(()) => true,
            Err(err) => {
                warn!(session_id = id, %err, "resize failed");
                false
            }
        }
    }

    /// Kill the session's process tree and remove it from the registry.
    ///
    /// Idempotent: returns `false` when no live session exists. After this
    /// returns, no further event for the killed process is published.
    pub async fn kill(&self, id: &str) -> bool {
        let removed = self.inner.sessions.lock().await.remove(id);
        match removed {
            Some(session) => {
                info!(session_id = id, generation = session.generation, "session killed");
                terminate(&session);
                true
            }
            None => false,
        }
    }

    /// Whether a live session exists for `id`.
    pub async fn exists(&self, id: &str) -> bool {
        self.inner.sessions.lock().await.contains_key(id)
    }

    /// Copy of the replay buffer. Re-attaches a hibernated session.
    pub async fn get_buffer(&self, id: &str) -> Option<Bytes> {
        let mut sessions = self.inner.sessions.lock().await;
        let session = sessions.get_mut(id)?;
        wake(session);
        Some(session.buffer.snapshot())
    }

    /// Current terminal state.
    pub async fn get_state(&self, id: &str) -> Option<TerminalState> {
        self.inner
            .sessions
            .lock()
            .await
            .get(id)
            .map(|session| session.state)
    }

    /// Point-in-time snapshot of every live session, sorted by id.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<SessionSnapshot> = self
            .inner
            .sessions
            .lock()
            .await
            .values()
            .map(|session| session.snapshot(now))
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Subscribe to `kinds` for one session. Re-attaches a hibernated session.
    ///
    /// Past events are not replayed; use [`get_buffer`](Self::get_buffer)
    /// to restore output context.
    pub async fn subscribe(&self, id: &str, kinds: &[EventKind]) -> Subscription {
        if let Some(session) = self.inner.sessions.lock().await.get_mut(id) {
            wake(session);
        }
        self.inner.hub.subscribe(Scope::session(id), kinds)
    }

    /// Hibernate every session that has been silent longer than `threshold`.
    ///
    /// Sessions awaiting input, already hibernated, or with output inside the
    /// last `tick` are skipped. Each hibernated session gets exactly one
    /// `idle` event; delivery problems for one session never affect others.
    /// Returns the ids that were hibernated.
    pub async fn hibernate_idle(&self, threshold: Duration, tick: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut sessions = self.inner.sessions.lock().await;

        let mut hibernated = Vec::new();
        for session in sessions.values_mut() {
            if session.presentation == Presentation::Hibernated
                || session.state == TerminalState::AwaitingInput
            {
                continue;
            }
            let silent_for = now.saturating_duration_since(session.last_output_at);
            if silent_for <= threshold || silent_for < tick {
                continue;
            }
            session.presentation = Presentation::Hibernated;
            hibernated.push((session.id.clone(), session.generation, silent_for));
        }

        let mut ids = Vec::with_capacity(hibernated.len());
        for (id, generation, silent_for) in hibernated {
            let delivered = self.inner.hub.publish(&SessionEvent::Idle {
                id: id.clone(),
                generation,
            });
            info!(
                session_id = %id,
                generation,
                silent_secs = silent_for.as_secs(),
                delivered,
                "session hibernated"
            );
            ids.push(id);
        }
        ids
    }

    /// Kill every live session and stop all output pumps.
    pub async fn shutdown(&self) {
        let drained: Vec<Session> = self
            .inner
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in &drained {
            terminate(session);
        }
        self.inner.cancel.cancel();
        info!(sessions = drained.len(), "session manager shut down");
    }
}

impl ManagerInner {
    /// Route one output chunk through the session's adapter and publish
    /// the resulting events. Chunks from stale generations are dropped.
    async fn dispatch_output(&self, id: &str, generation: u64, chunk: Bytes) {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(id) else {
            debug!(session_id = id, generation, "dropping output for removed session");
            return;
        };
        if session.generation != generation {
            debug!(
                session_id = id,
                generation,
                current = session.generation,
                "dropping output from stale generation"
            );
            return;
        }

        let now = Instant::now();
        session.record_output(&chunk, now);

        let mut events = Vec::new();

        if let Some(check) = session.stale_check {
            if !check.is_open(now) {
                session.stale_check = None;
            } else if stale_resume::matches_not_found(&chunk) {
                session.stale_check = None;
                info!(session_id = id, generation, "resume id not found by agent");
                events.push(SessionEvent::SessionNotFound {
                    id: id.to_owned(),
                    generation,
                });
            }
        }

        if !session.state.is_terminal() {
            let classification = if session.adapter.is_line_oriented() {
                session
                    .lines
                    .push(&chunk)
                    .map(|lines| session.adapter.classify(&lines, session.state))
                    .unwrap_or_default()
            } else {
                session.adapter.classify(&chunk, session.state)
            };

            let next = classification
                .state
                .or((session.state == TerminalState::Starting).then_some(TerminalState::Running));
            if let Some(next) = next.filter(|next| *next != session.state) {
                let old_state = session.state;
                session.state = next;
                debug!(session_id = id, ?old_state, new_state = ?next, "state change");
                events.push(SessionEvent::StateChange {
                    id: id.to_owned(),
                    generation,
                    new_state: next,
                    old_state,
                });
            }

            if let Some(conversation_id) = classification.conversation_id {
                if session.conversation_id.as_deref() != Some(conversation_id.as_str()) {
                    info!(session_id = id, conversation_id, "conversation id detected");
                    session.conversation_id = Some(conversation_id.clone());
                    events.push(SessionEvent::SessionDetected {
                        id: id.to_owned(),
                        generation,
                        conversation_id,
                    });
                }
            }

            if let Some(prompt) = classification.prompt {
                events.push(SessionEvent::Prompt {
                    id: id.to_owned(),
                    generation,
                    prompt,
                });
            }

            events.extend(
                classification
                    .events
                    .into_iter()
                    .map(|event| SessionEvent::Structured {
                        id: id.to_owned(),
                        generation,
                        event,
                    }),
            );
        }

        events.push(SessionEvent::Data {
            id: id.to_owned(),
            generation,
            chunk,
        });

        for event in &events {
            self.hub.publish(event);
        }
    }

    /// Deregister a session whose process exited and publish `dead` + `exit`.
    async fn dispatch_exit(&self, id: &str, generation: u64, exit_code: i32) {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(id).map(|session| session.generation) != Some(generation) {
            debug!(session_id = id, generation, "dropping exit from stale generation");
            return;
        }
        let Some(session) = sessions.remove(id) else {
            return;
        };

        info!(session_id = id, generation, exit_code, "session process exited");

        if session.state != TerminalState::Dead {
            self.hub.publish(&SessionEvent::StateChange {
                id: id.to_owned(),
                generation,
                new_state: TerminalState::Dead,
                old_state: session.state,
            });
        }
        self.hub.publish(&SessionEvent::Exit {
            id: id.to_owned(),
            generation,
            exit_code,
        });
    }

    async fn write_for_generation(&self, id: &str, generation: u64, data: Bytes) {
        let sessions = self.sessions.lock().await;
        match sessions.get(id) {
            Some(session) if session.generation == generation => {
                if let Err(err) = session.process.write(data) {
                    warn!(session_id = id, %err, "post-spawn command write failed");
                } else {
                    debug!(session_id = id, generation, "post-spawn command written");
                }
            }
            _ => debug!(session_id = id, generation, "post-spawn command skipped, session gone"),
        }
    }
}

fn wake(session: &mut Session) {
    if session.presentation == Presentation::Hibernated {
        debug!(session_id = session.id, "session re-attached");
        session.presentation = Presentation::Attached;
    }
}

fn terminate(session: &Session) {
    if let Err(err) = session.process.kill() {
        warn!(
            session_id = session.id,
            generation = session.generation,
            %err,
            "failed to terminate session process"
        );
    }
}

/// Forward one process's output and exit into the manager, in order.
async fn pump(
    inner: Weak<ManagerInner>,
    id: String,
    generation: u64,
    mut output: mpsc::UnboundedReceiver<Bytes>,
    mut exit: oneshot::Receiver<i32>,
    cancel: CancellationToken,
) {
    let exit_code = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return,

            chunk = output.recv() => {
                let Some(chunk) = chunk else {
                    break (&mut exit).await.unwrap_or(-1);
                };
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                inner.dispatch_output(&id, generation, chunk).await;
            }

            code = &mut exit => {
                let code = code.unwrap_or(-1);
                let Some(manager) = inner.upgrade() else {
                    return;
                };
                let _ = tokio::time::timeout(EXIT_DRAIN, async {
                    while let Some(chunk) = output.recv().await {
                        manager.dispatch_output(&id, generation, chunk).await;
                    }
                })
                .await;
                break code;
            }
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.dispatch_exit(&id, generation, exit_code).await;
    }
}
