//! Integration tests for session lifecycle through the manager.

use std::time::Duration;

use agentmux::events::{EventKind, Scope, SessionEvent};
use agentmux::models::prompt::PromptKind;
use agentmux::models::session::{Presentation, TerminalMode, TerminalState};
use agentmux::orchestrator::session_manager::{CreateSessionRequest, ManagerConfig};
use agentmux::AppError;

use super::test_helpers::{
    assert_quiet, eventually, next_event, test_manager, test_manager_config, test_manager_with,
};

fn shell(id: &str) -> CreateSessionRequest {
    CreateSessionRequest::new(id, "/tmp", TerminalMode::Shell)
}

fn claude(id: &str) -> CreateSessionRequest {
    CreateSessionRequest::new(id, "/tmp", TerminalMode::ClaudeCode)
}

// ── Create ───────────────────────────────────────────────────

#[tokio::test]
async fn create_registers_session() {
    let (manager, spawner) = test_manager();
    manager.create(shell("wi-1")).await.expect("create");

    assert!(manager.exists("wi-1").await);
    assert_eq!(manager.get_state("wi-1").await, Some(TerminalState::Starting));
    assert_eq!(spawner.spawn_count(), 1);

    let request = &spawner.last().request;
    assert_eq!(request.command, "/bin/sh");
    assert_eq!((request.cols, request.rows), (80, 24));

    let list = manager.list().await;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, "wi-1");
    assert_eq!(list[0].presentation, Presentation::Attached);
}

#[tokio::test]
async fn spawn_failure_leaves_no_entry() {
    let (manager, spawner) = test_manager();
    spawner.fail_next();

    let err = manager.create(shell("wi-1")).await.unwrap_err();
    assert!(matches!(err, AppError::Spawn(_)), "got {err:?}");
    assert!(!manager.exists("wi-1").await);
    assert!(manager.list().await.is_empty());
}

#[tokio::test]
async fn empty_id_is_rejected() {
    let (manager, spawner) = test_manager();
    let err = manager.create(shell("  ")).await.unwrap_err();

    assert!(matches!(err, AppError::Spawn(_)));
    assert_eq!(spawner.spawn_count(), 0);
}

#[tokio::test]
async fn list_is_sorted_by_id() {
    let (manager, _spawner) = test_manager();
    for id in ["wi-c", "wi-a", "wi-b"] {
        manager.create(shell(id)).await.expect("create");
    }

    let ids: Vec<String> = manager.list().await.into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["wi-a", "wi-b", "wi-c"]);
}

// ── Conversation ids ─────────────────────────────────────────

/// A structured session with no ids is pinned to a generated uuid, which
/// is announced to subscribers and typed into the agent command.
#[tokio::test]
async fn fresh_conversation_id_is_generated_and_announced() {
    let (manager, spawner) = test_manager();
    let mut sub = manager
        .events()
        .subscribe(Scope::session("wi-1"), &[EventKind::SessionDetected]);

    manager.create(claude("wi-1")).await.expect("create");

    let SessionEvent::SessionDetected { conversation_id, .. } = next_event(&mut sub).await else {
        panic!("expected session_detected");
    };
    uuid::Uuid::parse_str(&conversation_id).expect("generated id is a uuid");

    let snapshot = manager.list().await.remove(0);
    assert_eq!(snapshot.conversation_id.as_deref(), Some(conversation_id.as_str()));

    let handle = spawner.last();
    let expected = format!("claude --session-id {conversation_id}\r");
    eventually(|| handle.written_text() == expected).await;
}

#[tokio::test]
async fn caller_supplied_fresh_id_is_used_silently() {
    let (manager, spawner) = test_manager();
    let mut sub = manager
        .events()
        .subscribe(Scope::session("wi-1"), &[EventKind::SessionDetected]);

    manager
        .create(claude("wi-1").with_fresh_session_id("pinned-1"))
        .await
        .expect("create");

    let handle = spawner.last();
    eventually(|| handle.written_text() == "claude --session-id pinned-1\r").await;
    assert_quiet(&mut sub, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn shell_sessions_carry_no_conversation_id() {
    let (manager, spawner) = test_manager();
    manager
        .create(shell("wi-1").with_resume_id("ignored"))
        .await
        .expect("create");

    assert_eq!(manager.list().await[0].conversation_id, None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(spawner.last().written().is_empty());
}

#[tokio::test]
async fn initial_prompt_is_typed_after_settle_delay() {
    let (manager, spawner) = test_manager();
    manager
        .create(
            CreateSessionRequest::new("wi-1", "/tmp", TerminalMode::Codex)
                .with_initial_prompt("add tests"),
        )
        .await
        .expect("create");

    let handle = spawner.last();
    eventually(|| handle.written_text() == "codex 'add tests'\r").await;
}

/// A conversation id announced mid-stream replaces the known one.
#[tokio::test]
async fn conversation_id_detected_mid_stream() {
    let (manager, spawner) = test_manager();
    manager
        .create(claude("wi-1").with_fresh_session_id("first"))
        .await
        .expect("create");
    let mut sub = manager
        .subscribe("wi-1", &[EventKind::SessionDetected])
        .await;

    spawner
        .last()
        .emit("{\"type\":\"system\",\"session_id\":\"second\"}\n");

    let event = next_event(&mut sub).await;
    assert!(
        matches!(event, SessionEvent::SessionDetected { ref conversation_id, .. } if conversation_id == "second"),
        "got {event:?}"
    );
    assert_eq!(manager.list().await[0].conversation_id.as_deref(), Some("second"));
}

// ── Output and classification ────────────────────────────────

/// The first chunk moves a session out of `starting`, and the state change
/// is published before the chunk itself.
#[tokio::test]
async fn first_output_moves_to_running_before_data() {
    let (manager, spawner) = test_manager();
    manager.create(shell("wi-1")).await.expect("create");
    let mut sub = manager
        .subscribe("wi-1", &[EventKind::Data, EventKind::StateChange])
        .await;

    spawner.last().emit("$ ");

    let first = next_event(&mut sub).await;
    assert!(
        matches!(
            first,
            SessionEvent::StateChange {
                new_state: TerminalState::Running,
                old_state: TerminalState::Starting,
                ..
            }
        ),
        "got {first:?}"
    );
    let second = next_event(&mut sub).await;
    assert!(matches!(second, SessionEvent::Data { ref chunk, .. } if &chunk[..] == b"$ "));

    assert_eq!(manager.get_state("wi-1").await, Some(TerminalState::Running));
    assert_eq!(manager.get_buffer("wi-1").await.as_deref(), Some(&b"$ "[..]));
}

#[tokio::test]
async fn permission_request_emits_state_prompt_structured_then_data() {
    let (manager, spawner) = test_manager();
    manager.create(claude("wi-1")).await.expect("create");
    let mut sub = manager
        .subscribe(
            "wi-1",
            &[
                EventKind::Data,
                EventKind::StateChange,
                EventKind::Prompt,
                EventKind::Structured,
            ],
        )
        .await;

    spawner
        .last()
        .emit("{\"type\":\"permission_request\",\"message\":\"Allow edit?\"}\n");

    let kinds: Vec<EventKind> = [
        next_event(&mut sub).await,
        next_event(&mut sub).await,
        next_event(&mut sub).await,
        next_event(&mut sub).await,
    ]
    .iter()
    .map(SessionEvent::kind)
    .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::StateChange,
            EventKind::Prompt,
            EventKind::Structured,
            EventKind::Data
        ]
    );
    assert_eq!(manager.get_state("wi-1").await, Some(TerminalState::AwaitingInput));
}

/// An event line split across two reads is classified once it completes;
/// each raw chunk is still forwarded as data when it arrives.
#[tokio::test]
async fn event_split_across_reads_is_classified() {
    let (manager, spawner) = test_manager();
    manager.create(claude("wi-1")).await.expect("create");
    let mut sub = manager
        .subscribe("wi-1", &[EventKind::Data, EventKind::Prompt])
        .await;
    let handle = spawner.last();

    handle.emit("{\"type\":\"permission_req");
    let first = next_event(&mut sub).await;
    assert!(
        matches!(first, SessionEvent::Data { ref chunk, .. } if &chunk[..] == b"{\"type\":\"permission_req"),
        "got {first:?}"
    );
    assert_eq!(manager.get_state("wi-1").await, Some(TerminalState::Running));

    handle.emit("uest\",\"message\":\"Run tests?\"}\n");
    let SessionEvent::Prompt { prompt, .. } = next_event(&mut sub).await else {
        panic!("expected prompt once the line completes");
    };
    assert_eq!(prompt.kind, PromptKind::Permission);
    assert_eq!(prompt.text, "Run tests?");
    assert!(matches!(next_event(&mut sub).await, SessionEvent::Data { .. }));
    assert_quiet(&mut sub, Duration::from_millis(50)).await;

    assert_eq!(manager.get_state("wi-1").await, Some(TerminalState::AwaitingInput));
}

#[tokio::test]
async fn prompt_event_carries_prompt_details() {
    let (manager, spawner) = test_manager();
    manager.create(claude("wi-1")).await.expect("create");
    let mut sub = manager.subscribe("wi-1", &[EventKind::Prompt]).await;

    spawner
        .last()
        .emit("{\"type\":\"question\",\"text\":\"Which branch?\"}\n");

    let SessionEvent::Prompt { prompt, .. } = next_event(&mut sub).await else {
        panic!("expected prompt");
    };
    assert_eq!(prompt.kind, PromptKind::Question);
    assert_eq!(prompt.text, "Which branch?");
}

/// `error` is terminal for classification; later events do not move it.
#[tokio::test]
async fn error_state_is_sticky() {
    let (manager, spawner) = test_manager();
    manager.create(claude("wi-1")).await.expect("create");
    let mut sub = manager
        .subscribe("wi-1", &[EventKind::Data, EventKind::StateChange])
        .await;
    let handle = spawner.last();

    handle.emit("{\"type\":\"error\",\"message\":\"rate limited\"}\n");
    let first = next_event(&mut sub).await;
    assert!(matches!(
        first,
        SessionEvent::StateChange {
            new_state: TerminalState::Error,
            ..
        }
    ));
    assert!(matches!(next_event(&mut sub).await, SessionEvent::Data { .. }));

    handle.emit("{\"type\":\"thinking\"}\n");
    assert!(matches!(next_event(&mut sub).await, SessionEvent::Data { .. }));
    assert_eq!(manager.get_state("wi-1").await, Some(TerminalState::Error));
}

#[tokio::test]
async fn same_state_publishes_no_transition() {
    let (manager, spawner) = test_manager();
    manager.create(claude("wi-1")).await.expect("create");
    let mut sub = manager.subscribe("wi-1", &[EventKind::StateChange]).await;
    let handle = spawner.last();

    handle.emit("{\"type\":\"thinking\"}\n");
    assert!(matches!(next_event(&mut sub).await, SessionEvent::StateChange { .. }));

    handle.emit("{\"type\":\"tool_use\"}\n");
    assert_quiet(&mut sub, Duration::from_millis(50)).await;
}

/// Data events arrive in emission order.
#[tokio::test]
async fn data_preserves_emission_order() {
    let (manager, spawner) = test_manager();
    manager.create(shell("wi-1")).await.expect("create");
    let mut sub = manager.subscribe("wi-1", &[EventKind::Data]).await;
    let handle = spawner.last();

    for i in 0..100 {
        handle.emit(format!("{i},"));
    }

    let mut received = String::new();
    for _ in 0..100 {
        if let SessionEvent::Data { chunk, .. } = next_event(&mut sub).await {
            received.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
    let expected: String = (0..100).map(|i| format!("{i},")).collect();
    assert_eq!(received, expected);
}

/// Re-subscribing after an unsubscribe replays nothing; output missed in
/// between is only recoverable through the replay buffer.
#[tokio::test]
async fn resubscribe_gets_no_replay_but_buffer_has_everything() {
    let (manager, spawner) = test_manager();
    manager.create(shell("wi-1")).await.expect("create");
    let handle = spawner.last();

    let mut first = manager.subscribe("wi-1", &[EventKind::Data]).await;
    handle.emit("before ");
    assert!(matches!(next_event(&mut first).await, SessionEvent::Data { .. }));
    first.unsubscribe();

    handle.emit("while away ");
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.get_buffer("wi-1").await.as_deref() != Some(&b"before while away "[..]) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("missed output reaches the buffer");

    let mut second = manager.subscribe("wi-1", &[EventKind::Data]).await;
    assert_quiet(&mut second, Duration::from_millis(50)).await;

    handle.emit("after");
    let event = next_event(&mut second).await;
    assert!(
        matches!(event, SessionEvent::Data { ref chunk, .. } if &chunk[..] == b"after"),
        "got {event:?}"
    );
    assert_eq!(
        manager.get_buffer("wi-1").await.as_deref(),
        Some(&b"before while away after"[..])
    );
}

#[tokio::test]
async fn replay_buffer_is_bounded() {
    let config = ManagerConfig {
        buffer_max_bytes: 1024,
        ..test_manager_config()
    };
    let (manager, spawner) = test_manager_with(config);
    manager.create(shell("wi-1")).await.expect("create");
    let mut sub = manager.subscribe("wi-1", &[EventKind::Data]).await;
    let handle = spawner.last();

    for _ in 0..10 {
        handle.emit([b'x'; 512]);
    }
    for _ in 0..10 {
        next_event(&mut sub).await;
    }

    let buffer = manager.get_buffer("wi-1").await.expect("buffer");
    assert_eq!(buffer.len(), 1024);
    assert!(buffer.starts_with(b"\x1b[0m"));
}

#[tokio::test]
async fn unknown_session_queries_return_none() {
    let (manager, _spawner) = test_manager();
    assert!(!manager.exists("nope").await);
    assert_eq!(manager.get_buffer("nope").await, None);
    assert_eq!(manager.get_state("nope").await, None);
}

// ── Write and resize ─────────────────────────────────────────

#[tokio::test]
async fn write_and_resize_reach_live_process() {
    let (manager, spawner) = test_manager();
    manager.create(shell("wi-1")).await.expect("create");
    let handle = spawner.last();

    assert!(manager.write("wi-1", &b"ls\r"[..]).await);
    assert!(manager.resize("wi-1", 132, 50).await);

    assert_eq!(handle.written(), b"ls\r".to_vec());
    assert_eq!(handle.resizes(), vec![(132, 50)]);
}

#[tokio::test]
async fn write_and_resize_to_missing_session_are_noops() {
    let (manager, _spawner) = test_manager();
    assert!(!manager.write("ghost", &b"ls\r"[..]).await);
    assert!(!manager.resize("ghost", 80, 24).await);
}

// ── Exit ─────────────────────────────────────────────────────

#[tokio::test]
async fn process_exit_publishes_dead_then_exit_and_deregisters() {
    let (manager, spawner) = test_manager();
    manager.create(shell("wi-1")).await.expect("create");
    let mut sub = manager
        .subscribe("wi-1", &[EventKind::StateChange, EventKind::Exit])
        .await;

    spawner.last().exit(2);

    let first = next_event(&mut sub).await;
    assert!(
        matches!(
            first,
            SessionEvent::StateChange {
                new_state: TerminalState::Dead,
                old_state: TerminalState::Starting,
                ..
            }
        ),
        "got {first:?}"
    );
    let second = next_event(&mut sub).await;
    assert!(matches!(second, SessionEvent::Exit { exit_code: 2, .. }), "got {second:?}");
    assert!(!manager.exists("wi-1").await);
}

// ── Kill and shutdown ────────────────────────────────────────

#[tokio::test]
async fn kill_is_idempotent() {
    let (manager, spawner) = test_manager();
    manager.create(shell("wi-1")).await.expect("create");

    assert!(manager.kill("wi-1").await);
    assert!(spawner.last().is_killed());
    assert!(!manager.exists("wi-1").await);
    assert!(!manager.kill("wi-1").await);
}

/// A session killed before its settle delay never receives the agent command.
#[tokio::test]
async fn post_spawn_command_skipped_after_kill() {
    let (manager, spawner) = test_manager();
    manager.create(claude("wi-1")).await.expect("create");
    manager.kill("wi-1").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(spawner.last().written().is_empty());
}

#[tokio::test]
async fn shutdown_kills_every_session() {
    let (manager, spawner) = test_manager();
    manager.create(shell("wi-1")).await.expect("create");
    manager.create(shell("wi-2")).await.expect("create");

    manager.shutdown().await;

    assert!(spawner.handle(0).is_killed());
    assert!(spawner.handle(1).is_killed());
    assert!(manager.list().await.is_empty());
}
