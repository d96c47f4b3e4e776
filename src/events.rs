//! Event surface consumed by the UI layer. The core never depends on any UI
//! reactivity; interested parties subscribe to a broadcast bus instead.

use tokio::sync::broadcast;

use crate::realtime::ConnectionState;

/// Notifications emitted by the session core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new credential was persisted (login or successful refresh).
    CredentialChanged,
    /// The session is terminally invalid; consumers redirect to login.
    SessionInvalidated,
    /// The realtime connection moved to a new state.
    ConnectionStateChanged(ConnectionState),
    /// Reconnect attempts were exhausted. Non-fatal: the REST-backed UI keeps
    /// working, consumers may show a non-blocking indicator.
    RealtimeUnavailable,
}

/// Cheap clonable handle around a broadcast channel.
///
/// Emission never blocks and never fails: events sent while nobody listens
/// are dropped, which matches the fire-and-forget contract of the UI bridge.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        // A send error only means there is no receiver right now.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self { Self::new(64) }
}
