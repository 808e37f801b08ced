//! Typed publish/subscribe hub.
//!
//! Subscribers register for one or more [`EventKind`]s, scoped to a single
//! session or to all sessions. Each subscriber owns an unbounded channel, so
//! publishing never blocks on a slow consumer; a subscriber whose receiver
//! has been dropped is pruned on the next publish without affecting anyone
//! else.
//!
//! Subscribe and unsubscribe are O(1) hash-map operations and may be called
//! from any thread, including while another thread is publishing. Events
//! published by one thread reach each subscriber in publish order, across
//! every kind that subscriber listens to.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{EventKind, SessionEvent};

/// Which sessions a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Events of one session id.
    Session(String),
    /// Events of every session.
    All,
}

impl Scope {
    /// Scope for a single session id.
    #[must_use]
    pub fn session(id: impl Into<String>) -> Self {
        Self::Session(id.into())
    }
}

type Topic = (Scope, EventKind);

#[derive(Default)]
struct HubState {
    next_key: u64,
    topics: HashMap<Topic, HashMap<u64, mpsc::UnboundedSender<SessionEvent>>>,
}

impl HubState {
    fn remove(&mut self, topic: &Topic, key: u64) {
        if let Some(subscribers) = self.topics.get_mut(topic) {
            subscribers.remove(&key);
            if subscribers.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    /// Send to every subscriber of `topic`, pruning closed receivers.
    fn deliver(&mut self, topic: &Topic, event: &SessionEvent) -> usize {
        let Some(subscribers) = self.topics.get_mut(topic) else {
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|key, tx| {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                debug!(
                    subscriber = key,
                    session_id = event.session_id(),
                    kind = ?event.kind(),
                    "event hub: pruning closed subscriber"
                );
                false
            }
        });

        if subscribers.is_empty() {
            self.topics.remove(topic);
        }
        delivered
    }
}

/// Publish/subscribe hub for [`SessionEvent`]s.
///
/// Cheap to clone; clones share the same subscriber table.
#[derive(Clone, Default)]
pub struct EventHub {
    state: Arc<Mutex<HubState>>,
}

impl EventHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for `kinds` within `scope`.
    ///
    /// All kinds share one channel, so the subscriber observes them in the
    /// order they were published. Past events are never replayed.
    #[must_use]
    pub fn subscribe(&self, scope: Scope, kinds: &[EventKind]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let key = state.next_key;
        state.next_key += 1;

        let mut topics = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let topic = (scope.clone(), *kind);
            if topics.contains(&topic) {
                continue;
            }
            state
                .topics
                .entry(topic.clone())
                .or_default()
                .insert(key, tx.clone());
            topics.push(topic);
        }

        Subscription {
            key,
            topics,
            rx,
            hub: Arc::downgrade(&self.state),
        }
    }

    /// Deliver `event` to subscribers of its session and to wildcard
    /// subscribers. Returns the number of successful deliveries.
    pub fn publish(&self, event: &SessionEvent) -> usize {
        let kind = event.kind();
        let session_topic = (Scope::Session(event.session_id().to_owned()), kind);
        let wildcard_topic = (Scope::All, kind);

        let mut state = self.state.lock();
        state.deliver(&session_topic, event) + state.deliver(&wildcard_topic, event)
    }

    /// Number of live subscribers for one topic.
    #[must_use]
    pub fn subscriber_count(&self, scope: &Scope, kind: EventKind) -> usize {
        self.state
            .lock()
            .topics
            .get(&(scope.clone(), kind))
            .map_or(0, HashMap::len)
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    key: u64,
    topics: Vec<Topic>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    hub: Weak<Mutex<HubState>>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Take the next already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain every already-delivered event.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Stop receiving events. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(state) = self.hub.upgrade() else {
            return;
        };
        let mut state = state.lock();
        for topic in &self.topics {
            state.remove(topic, self.key);
        }
    }
}
