//! Unit tests for the bounded replay buffer.

use agentmux::orchestrator::replay_buffer::{ReplayBuffer, RESET_SEQUENCE};

// ── Under the ceiling ────────────────────────────────────────

#[test]
fn retains_everything_below_ceiling() {
    let mut buffer = ReplayBuffer::new(1024);
    buffer.push(b"hello ");
    buffer.push(b"world");

    assert_eq!(&buffer.snapshot()[..], b"hello world");
    assert_eq!(buffer.len(), 11);
    assert!(!buffer.was_truncated());
}

#[test]
fn exactly_full_buffer_is_not_truncated() {
    let mut buffer = ReplayBuffer::new(16);
    buffer.push(&[b'a'; 16]);

    assert_eq!(buffer.len(), 16);
    assert!(!buffer.was_truncated());
    assert!(!buffer.snapshot().starts_with(RESET_SEQUENCE));
}

#[test]
fn empty_buffer_snapshot_is_empty() {
    let buffer = ReplayBuffer::new(64);
    assert!(buffer.is_empty());
    assert!(buffer.snapshot().is_empty());
}

// ── Overflow ─────────────────────────────────────────────────

/// Overflow keeps the most recent bytes behind a reset prefix and never
/// exceeds the ceiling.
#[test]
fn overflow_keeps_tail_with_reset_prefix() {
    let mut buffer = ReplayBuffer::new(16);
    buffer.push(b"0123456789");
    buffer.push(b"abcdefghij");

    let snapshot = buffer.snapshot();
    assert_eq!(snapshot.len(), 16);
    assert!(snapshot.starts_with(RESET_SEQUENCE));
    assert_eq!(&snapshot[RESET_SEQUENCE.len()..], b"89abcdefghij");
    assert!(buffer.was_truncated());
}

#[test]
fn single_oversized_chunk_keeps_its_tail() {
    let mut buffer = ReplayBuffer::new(12);
    buffer.push(b"the quick brown fox jumps");

    let snapshot = buffer.snapshot();
    assert_eq!(snapshot.len(), 12);
    assert_eq!(&snapshot[..RESET_SEQUENCE.len()], RESET_SEQUENCE);
    assert_eq!(&snapshot[RESET_SEQUENCE.len()..], b"ox jumps");
}

/// Repeated overflow does not stack reset prefixes.
#[test]
fn repeated_overflow_has_single_reset_prefix() {
    let mut buffer = ReplayBuffer::new(32);
    for _ in 0..50 {
        buffer.push(b"\x1b[31mred\x1b[0m ");
    }

    let snapshot = buffer.snapshot();
    assert!(snapshot.len() <= 32);
    assert!(snapshot.starts_with(RESET_SEQUENCE));
    assert!(!snapshot[RESET_SEQUENCE.len()..].starts_with(RESET_SEQUENCE));
}

#[test]
fn tiny_ceiling_is_raised_to_fit_reset_prefix() {
    let mut buffer = ReplayBuffer::new(1);
    assert_eq!(buffer.capacity(), RESET_SEQUENCE.len() + 1);

    buffer.push(b"abcdefgz");
    let snapshot = buffer.snapshot();
    assert_eq!(snapshot.len(), buffer.capacity());
    assert_eq!(snapshot.last(), Some(&b'z'));
}

/// A snapshot is a copy; later pushes do not alter it.
#[test]
fn snapshot_is_independent_copy() {
    let mut buffer = ReplayBuffer::new(64);
    buffer.push(b"before");
    let snapshot = buffer.snapshot();
    buffer.push(b" after");

    assert_eq!(&snapshot[..], b"before");
    assert_eq!(&buffer.snapshot()[..], b"before after");
}
