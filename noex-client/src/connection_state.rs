//! Connection state management
//!
//! Tracks the client lifecycle and owns the flags that decide what happens
//! when the socket closes.
//!
//! # Connection States
//!
//! ```text
//! Disconnected → Connecting → Connected
//!       ↑             │           │
//!       └─────────────┘           ↓ (unexpected close)
//!       ↑                   Reconnecting ──→ Connected
//!       └──────────────────────────┘ (gave up / disconnect())
//! ```
//!
//! # Flags
//!
//! - **intentional**: set by `disconnect()` and by a server session
//!   revocation; suppresses reconnection
//! - **connecting**: an initial `connect()` is in flight
//! - **reconnecting**: a reconnect loop is running; at most one runs at a time
//!
//! # Handshakes
//!
//! From the physical connect until the caller has announced the connection,
//! a close is not handled on the spot. It is parked with
//! [`ConnectionManager::defer_close`] and handed back by
//! [`ConnectionManager::finish_handshake`], under one lock, so a close can
//! never fall between the end of a handshake and the close handling.
//!
//! The backoff wait between reconnect attempts can be cut short by
//! [`ConnectionManager::abort_wait`].

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

/// Client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }

    /// Numeric encoding for the connection state gauge
    pub fn as_metric_value(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical socket state, owned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Close code and reason
pub type CloseInfo = (u16, String);

#[derive(Debug, Default)]
struct Handshake {
    active: bool,
    deferred_close: Option<CloseInfo>,
}

/// Shared lifecycle state of one client
pub struct ConnectionManager {
    state: RwLock<ConnectionState>,
    intentional: AtomicBool,
    connecting: AtomicBool,
    reconnecting: AtomicBool,
    handshake: Mutex<Handshake>,
    abort: Mutex<Option<oneshot::Sender<()>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            intentional: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            handshake: Mutex::new(Handshake::default()),
            abort: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Set the state, returning the previous one
    pub fn set_state(&self, new_state: ConnectionState) -> ConnectionState {
        let mut state = self.state.write();
        let previous = *state;
        *state = new_state;

        if previous != new_state {
            tracing::debug!(from = %previous, to = %new_state, "Connection state changed");
        }

        previous
    }

    pub fn is_intentional(&self) -> bool {
        self.intentional.load(Ordering::SeqCst)
    }

    pub fn set_intentional(&self, intentional: bool) {
        self.intentional.store(intentional, Ordering::SeqCst);
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    pub fn set_connecting(&self, connecting: bool) {
        self.connecting.store(connecting, Ordering::SeqCst);
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Claim the reconnect loop; `false` when one is already running
    pub fn try_begin_reconnect(&self) -> bool {
        self.reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_reconnect(&self) {
        self.reconnecting.store(false, Ordering::SeqCst);
        self.abort.lock().take();
    }

    /// Start a handshake, forgetting any close parked by an earlier one
    pub fn begin_handshake(&self) {
        *self.handshake.lock() = Handshake {
            active: true,
            deferred_close: None,
        };
    }

    /// Park a close for the running handshake
    ///
    /// Returns `false` when no handshake runs and the close must be handled
    /// now. Only the first close is kept.
    pub fn defer_close(&self, code: u16, reason: &str) -> bool {
        let mut handshake = self.handshake.lock();
        if !handshake.active {
            return false;
        }
        handshake
            .deferred_close
            .get_or_insert_with(|| (code, reason.to_string()));
        true
    }

    /// Take a parked close, leaving the handshake running
    pub fn take_deferred_close(&self) -> Option<CloseInfo> {
        self.handshake.lock().deferred_close.take()
    }

    /// End the handshake and hand back the close parked during it
    pub fn finish_handshake(&self) -> Option<CloseInfo> {
        let mut handshake = self.handshake.lock();
        handshake.active = false;
        handshake.deferred_close.take()
    }

    /// Sleep for `delay` unless aborted first
    ///
    /// Returns `true` when the full delay elapsed, `false` when the wait was
    /// aborted or the disconnect was already intentional.
    pub async fn wait_or_abort(&self, delay: Duration) -> bool {
        let (tx, rx) = oneshot::channel();
        *self.abort.lock() = Some(tx);

        // disconnect() sets the flag before taking the sender
        if self.is_intentional() {
            self.abort.lock().take();
            return false;
        }

        let elapsed = tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = rx => false,
        };

        self.abort.lock().take();
        elapsed
    }

    /// Wake a pending `wait_or_abort`, if any
    pub fn abort_wait(&self) {
        if let Some(tx) = self.abort.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_close_outside_handshake_is_not_deferred() {
        let manager = ConnectionManager::new();
        assert!(!manager.defer_close(1006, ""));
        assert_eq!(manager.finish_handshake(), None);
    }

    #[test]
    fn test_close_during_handshake_is_handed_back() {
        let manager = ConnectionManager::new();
        manager.begin_handshake();

        assert!(manager.defer_close(4003, "too_many_connections"));
        assert!(manager.defer_close(1006, ""));

        assert_eq!(
            manager.finish_handshake(),
            Some((4003, "too_many_connections".to_string()))
        );
        assert!(!manager.defer_close(1006, ""));
        assert_eq!(manager.finish_handshake(), None);
    }

    #[test]
    fn test_new_handshake_forgets_old_close() {
        let manager = ConnectionManager::new();
        manager.begin_handshake();
        manager.defer_close(1006, "");
        assert_eq!(manager.take_deferred_close(), Some((1006, String::new())));
        assert!(manager.defer_close(1001, "going away"));

        manager.begin_handshake();
        assert_eq!(manager.finish_handshake(), None);
    }

    #[test]
    fn test_state_transitions() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        assert_eq!(
            manager.set_state(ConnectionState::Connecting),
            ConnectionState::Disconnected
        );
        manager.set_state(ConnectionState::Connected);
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.set_state(ConnectionState::Reconnecting);
        assert_eq!(manager.state().to_string(), "reconnecting");
    }

    #[test]
    fn test_single_reconnect_loop() {
        let manager = ConnectionManager::new();

        assert!(manager.try_begin_reconnect());
        assert!(!manager.try_begin_reconnect());
        assert!(manager.is_reconnecting());

        manager.end_reconnect();
        assert!(!manager.is_reconnecting());
        assert!(manager.try_begin_reconnect());
    }

    #[tokio::test]
    async fn test_wait_elapses() {
        let manager = ConnectionManager::new();
        assert!(manager.wait_or_abort(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_wait_aborted() {
        let manager = Arc::new(ConnectionManager::new());

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let elapsed = manager.wait_or_abort(Duration::from_secs(30)).await;
                (elapsed, started.elapsed())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.set_intentional(true);
        manager.abort_wait();

        let (elapsed, took) = waiter.await.unwrap();
        assert!(!elapsed);
        assert!(took < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_wait_skipped_when_already_intentional() {
        let manager = ConnectionManager::new();
        manager.set_intentional(true);
        assert!(!manager.wait_or_abort(Duration::from_secs(30)).await);
    }

    #[test]
    fn test_abort_without_waiter_is_noop() {
        let manager = ConnectionManager::new();
        manager.abort_wait();
        manager.abort_wait();
    }

    #[test]
    fn test_metric_values_distinct() {
        let values = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
        ]
        .map(|s| s.as_metric_value());

        assert_eq!(values, [0, 1, 2, 3]);
    }
}
