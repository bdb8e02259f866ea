//! Client lifecycle events
//!
//! Listeners are registered per [`EventKind`] and called synchronously, in
//! registration order, from whichever task raised the event. Each call runs
//! inside its own panic boundary.

use crate::guard::call_guarded;
use noex_core::{Error, WelcomeInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Welcome,
    Disconnected,
    Reconnecting,
    Reconnected,
    Error,
    SessionRevoked,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The connection is usable (after welcome and auto-login)
    Connected,
    /// The server handshake of the current connection
    Welcome(WelcomeInfo),
    /// The client gave up on the connection
    Disconnected { reason: String },
    /// A reconnect attempt is about to wait its backoff delay; 1-based
    Reconnecting { attempt: u32 },
    /// A reconnect attempt succeeded and subscriptions were restored
    Reconnected,
    Error(Error),
    /// The server revoked the session; no reconnect follows
    SessionRevoked { reason: String },
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connected => EventKind::Connected,
            ClientEvent::Welcome(_) => EventKind::Welcome,
            ClientEvent::Disconnected { .. } => EventKind::Disconnected,
            ClientEvent::Reconnecting { .. } => EventKind::Reconnecting,
            ClientEvent::Reconnected => EventKind::Reconnected,
            ClientEvent::Error(_) => EventKind::Error,
            ClientEvent::SessionRevoked { .. } => EventKind::SessionRevoked,
        }
    }
}

type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;
type ListenerTable = Mutex<HashMap<EventKind, Vec<(u64, Listener)>>>;

#[derive(Default)]
pub struct EventRegistry {
    listeners: Arc<ListenerTable>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Unsubscribe
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));

        Unsubscribe {
            listeners: Arc::downgrade(&self.listeners),
            kind,
            id,
        }
    }

    pub fn emit(&self, event: ClientEvent) {
        let kind = event.kind();
        let snapshot: Vec<Listener> = match self.listeners.lock().get(&kind) {
            Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
            None => return,
        };

        for listener in snapshot {
            call_guarded("event listener", || listener(&event));
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.lock().get(&kind).map_or(0, Vec::len)
    }
}

/// Handle returned by [`NoexClient::on`](crate::NoexClient::on)
///
/// Dropping the handle keeps the listener registered.
#[derive(Debug, Clone)]
pub struct Unsubscribe {
    listeners: Weak<ListenerTable>,
    kind: EventKind,
    id: u64,
}

impl Unsubscribe {
    /// Remove the listener; further calls do nothing
    pub fn unsubscribe(&self) {
        let Some(listeners) = self.listeners.upgrade() else {
            return;
        };

        let mut table = listeners.lock();
        if let Some(list) = table.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}
