//! noex client over WebSocket
//!
//! This module provides [`NoexClient`], the orchestrator that binds the
//! transport, the request and subscription machinery and the reconnect loop
//! into one connection lifecycle.
//!
//! # Client Lifecycle
//!
//! 1. **Connect**: open the socket, wait for the server's `welcome`, log in
//!    again when the server asks for it
//! 2. **Use**: send requests, hold subscriptions, listen to events
//! 3. **Reconnect** (optional): after an unexpected close, retry with backoff
//!    and restore every subscription under its new server ID
//! 4. **Disconnect**: fail pending requests, drop subscriptions, close
//!
//! # Dispatch
//!
//! Every incoming frame is offered, in order, to the request manager, the
//! push router and the system-message handler; the first one that consumes
//! it wins.
//!
//! # Cloning
//!
//! `NoexClient` is cheaply cloneable using `Arc` internally. All clones share
//! the same connection and state.

use crate::api::{AuthApi, ProceduresApi, RulesApi, StoreApi};
use crate::config::ClientOptions;
use crate::connection_state::{ConnectionManager, ConnectionState};
use crate::events::{ClientEvent, EventKind, EventRegistry, Unsubscribe};
use crate::metrics::ClientMetrics;
use crate::push_router::PushRouter;
use crate::reconnect::{ExponentialBackoff, ReconnectionStrategy};
use crate::request::RequestManager;
use crate::subscription::SubscriptionManager;
use crate::transport::{TransportEvent, TransportHandler, WebSocketTransport};
use noex_core::{codec, Error, IncomingMessage, Result, WelcomeInfo};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::oneshot;

/// Close code sent when the client hangs up on purpose
const CLOSE_NORMAL: u16 = 1000;

const DEFAULT_REVOKE_REASON: &str = "Session revoked by administrator";
const MAX_ATTEMPTS_REASON: &str = "Max reconnect attempts reached";

type WelcomeWaiter = oneshot::Sender<Result<WelcomeInfo>>;

/// noex client over a single WebSocket
#[derive(Clone)]
pub struct NoexClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    url: String,
    options: ClientOptions,
    /// Lifecycle state and the flags that steer close handling
    connection: ConnectionManager,
    requests: RequestManager,
    subscriptions: Arc<SubscriptionManager>,
    push_router: PushRouter,
    events: EventRegistry,
    transport: WebSocketTransport,
    /// Resolved by the first `welcome` of a handshake
    welcome_waiter: Mutex<Option<WelcomeWaiter>>,
    /// Token returned by `identity.login`, reused on reconnect
    session_token: Mutex<Option<String>>,
    /// `None` disables reconnection
    strategy: Option<Arc<dyn ReconnectionStrategy>>,
    metrics: Option<Arc<ClientMetrics>>,
    this: Weak<ClientInner>,
}

impl NoexClient {
    /// Create a client without connecting
    ///
    /// Reconnection follows `options.reconnect`; use
    /// [`ClientBuilder`](crate::ClientBuilder) for a custom strategy or metrics.
    pub fn new(url: impl Into<String>, options: ClientOptions) -> Self {
        let strategy = options
            .reconnect
            .clone()
            .map(|reconnect| Arc::new(ExponentialBackoff::from(reconnect)) as Arc<dyn ReconnectionStrategy>);

        Self::from_parts(url.into(), options, strategy, None)
    }

    /// Create a client with default options and connect it
    pub async fn connect_to(url: impl Into<String>) -> Result<Self> {
        let client = Self::new(url, ClientOptions::default());
        client.connect().await?;
        Ok(client)
    }

    pub(crate) fn from_parts(
        url: String,
        options: ClientOptions,
        strategy: Option<Arc<dyn ReconnectionStrategy>>,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        let inner = Arc::new_cyclic(|this: &Weak<ClientInner>| {
            let handler: TransportHandler = {
                let this = this.clone();
                Arc::new(move |event| {
                    if let Some(inner) = this.upgrade() {
                        inner.on_transport_event(event);
                    }
                })
            };

            let subscriptions = Arc::new(SubscriptionManager::new());
            let push_router = {
                let subscriptions = subscriptions.clone();
                let metrics = metrics.clone();
                PushRouter::new(move |subscription_id, channel, data| {
                    if let Some(ref m) = metrics {
                        m.record_push(channel);
                    }
                    subscriptions.handle_push(subscription_id, data);
                })
            };

            ClientInner {
                transport: WebSocketTransport::new(
                    url.clone(),
                    options.connect_timeout,
                    options.heartbeat,
                    handler,
                ),
                url,
                requests: RequestManager::new(options.request_timeout),
                options,
                connection: ConnectionManager::new(),
                subscriptions,
                push_router,
                events: EventRegistry::new(),
                welcome_waiter: Mutex::new(None),
                session_token: Mutex::new(None),
                strategy,
                metrics,
                this: this.clone(),
            }
        });

        Self { inner }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.requests.pending_count()
    }

    /// Subscriptions currently tracked by this client
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.count()
    }

    pub(crate) fn subscriptions(&self) -> &SubscriptionManager {
        &self.inner.subscriptions
    }

    /// Connect and complete the welcome handshake
    ///
    /// A close that arrives after the welcome but before this returns is
    /// handled once the `Connected` and `Welcome` events are out: the
    /// client reconnects or reports `Disconnected` as for any other close.
    ///
    /// When the welcome says `requiresAuth`, the client logs in before this
    /// returns: first with the session token cached by an earlier
    /// `identity.login`, then with the configured token, then with the
    /// configured credentials. `Connected` and `Welcome` events follow, in
    /// that order.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidRequest` when the client is not disconnected
    /// - `Error::Connection` when the socket cannot be opened or no welcome
    ///   arrives within the connect timeout
    /// - any error of the login request
    ///
    /// On failure the socket is closed and the state is `Disconnected`.
    #[tracing::instrument(skip(self), fields(url = %self.inner.url))]
    pub async fn connect(&self) -> Result<WelcomeInfo> {
        let inner = &self.inner;

        let state = inner.connection.state();
        if state != ConnectionState::Disconnected {
            return Err(Error::InvalidRequest(format!("Client is already {}", state)));
        }

        inner.connection.set_intentional(false);
        inner.connection.set_connecting(true);
        inner.set_state(ConnectionState::Connecting);
        tracing::info!("Connecting to server");

        let outcome = inner.establish().await;
        inner.connection.set_connecting(false);

        match outcome {
            Ok(welcome) => {
                tracing::info!(version = %welcome.version, "Connected successfully");
                inner.events.emit(ClientEvent::Connected);
                inner.events.emit(ClientEvent::Welcome(welcome.clone()));

                if let Some((code, reason)) = inner.connection.finish_handshake() {
                    tracing::warn!(code, "Connection closed during handshake");
                    inner.handle_close(code, reason);
                }
                Ok(welcome)
            }
            Err(e) => {
                inner.connection.finish_handshake();
                tracing::warn!(error = %e, "Connect failed");
                inner.transport.disconnect(CLOSE_NORMAL, "Connect failed").await;
                inner.requests.reject_all(Error::Disconnected("Connect failed".to_string()));
                inner.set_state(ConnectionState::Disconnected);
                if let Some(ref m) = inner.metrics {
                    m.record_error(e.code());
                }
                Err(e)
            }
        }
    }

    /// Tear the connection down for good
    ///
    /// Cancels a running reconnect loop, fails every pending request, drops
    /// all subscriptions without telling the server and closes the socket.
    /// Calling it again is a no-op.
    pub async fn disconnect(&self) {
        let inner = &self.inner;

        inner.connection.set_intentional(true);
        inner.connection.abort_wait();

        if let Some(waiter) = inner.welcome_waiter.lock().take() {
            let _ = waiter.send(Err(Error::Disconnected("Client disconnecting".to_string())));
        }
        inner.requests.reject_all(Error::Disconnected("Client disconnecting".to_string()));
        inner.subscriptions.clear();
        inner.transport.disconnect(CLOSE_NORMAL, "Client disconnect").await;

        if inner.set_state(ConnectionState::Disconnected) != ConnectionState::Disconnected {
            tracing::info!("Disconnected");
        }
    }

    /// Send a request and wait for its result
    ///
    /// `payload` must be a JSON object or `null`; its fields are merged into
    /// the frame next to `id` and `type`.
    ///
    /// # Errors
    ///
    /// - `Error::Disconnected` unless the client is connected, or when the
    ///   connection goes away before the response
    /// - `Error::RequestTimeout` after the request timeout
    /// - `Error::Server` with the server's code, message and details
    #[tracing::instrument(skip(self, payload))]
    pub async fn request(&self, request_type: &str, payload: Value) -> Result<Value> {
        self.inner.request(request_type, payload).await
    }

    /// Typed variant of [`request`](Self::request)
    pub async fn request_as<P, R>(&self, request_type: &str, payload: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload)?;
        let result = self.request(request_type, payload).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Listen for a lifecycle event
    ///
    /// The returned handle removes this listener; calling it more than once is
    /// harmless.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Unsubscribe
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    pub fn auth(&self) -> AuthApi {
        AuthApi::new(self.clone())
    }

    pub fn store(&self) -> StoreApi {
        StoreApi::new(self.clone())
    }

    pub fn rules(&self) -> RulesApi {
        RulesApi::new(self.clone())
    }

    pub fn procedures(&self) -> ProceduresApi {
        ProceduresApi::new(self.clone())
    }
}

impl std::fmt::Debug for NoexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoexClient")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        let previous = self.connection.set_state(state);
        if let Some(ref m) = self.metrics {
            m.update_connection_state(state);
        }
        previous
    }

    async fn request(&self, request_type: &str, payload: Value) -> Result<Value> {
        let state = self.connection.state();
        if state != ConnectionState::Connected {
            return Err(Error::Disconnected(format!(
                "Cannot send request {}, client is {}",
                request_type, state
            )));
        }

        let start = Instant::now();
        let outcome = self.requests.send(&self.transport, request_type, payload).await;

        if let Some(ref m) = self.metrics {
            let duration = start.elapsed().as_secs_f64();
            match &outcome {
                Ok(_) => m.record_request(request_type, "success", duration),
                Err(e) => {
                    m.record_request(request_type, "error", duration);
                    m.record_error(e.code());
                }
            }
        }

        outcome
    }

    /// Physical connect, welcome handshake and auto-login
    ///
    /// The state is `Connected` once the welcome arrived, so the login
    /// request can go out.
    async fn establish(&self) -> Result<WelcomeInfo> {
        self.connection.begin_handshake();
        let (tx, rx) = oneshot::channel();
        *self.welcome_waiter.lock() = Some(tx);

        if let Err(e) = self.transport.connect().await {
            self.welcome_waiter.lock().take();
            return Err(e);
        }

        let timeout = self.options.connect_timeout;
        let welcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(_)) => return Err(Error::Internal("Welcome channel closed".to_string())),
            Err(_) => {
                self.welcome_waiter.lock().take();
                return Err(Error::Connection(format!(
                    "Timeout waiting for welcome message after {}ms",
                    timeout.as_millis()
                )));
            }
        };

        tracing::debug!(
            version = %welcome.version,
            requires_auth = welcome.requires_auth,
            "Welcome received"
        );
        self.set_state(ConnectionState::Connected);

        if welcome.requires_auth {
            self.auto_login().await?;
        }

        Ok(welcome)
    }

    async fn auto_login(&self) -> Result<()> {
        let cached = self.session_token.lock().clone();
        if let Some(token) = cached {
            match self.request("auth.login", json!({ "token": token })).await {
                Ok(_) => {
                    tracing::debug!("Logged in with cached session token");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Cached session token rejected");
                    self.session_token.lock().take();
                }
            }
        }

        let Some(auth) = self.options.auth.as_ref() else {
            return Ok(());
        };

        if let Some(ref token) = auth.token {
            self.request("auth.login", json!({ "token": token })).await?;
            tracing::debug!("Logged in with configured token");
            return Ok(());
        }

        if let Some(ref credentials) = auth.credentials {
            let result = self
                .request(
                    "identity.login",
                    json!({
                        "username": credentials.username,
                        "password": credentials.password,
                    }),
                )
                .await?;

            if let Some(token) = result.get("token").and_then(Value::as_str) {
                *self.session_token.lock() = Some(token.to_string());
            }
            tracing::debug!(username = %credentials.username, "Logged in with credentials");
        }

        Ok(())
    }

    fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {}
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Close { code, reason } => self.on_close(code, reason),
            TransportEvent::Error(message) => {
                if let Some(ref m) = self.metrics {
                    m.record_error("WEBSOCKET_ERROR");
                }
                self.events.emit(ClientEvent::Error(Error::WebSocket(message)));
            }
        }
    }

    fn on_message(&self, text: &str) {
        let message = match codec::decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring undecodable frame");
                return;
            }
        };

        if let IncomingMessage::Welcome(ref welcome) = message {
            match self.welcome_waiter.lock().take() {
                Some(waiter) => {
                    let _ = waiter.send(Ok(welcome.clone()));
                }
                None => tracing::debug!("Welcome outside a handshake ignored"),
            }
            return;
        }

        if self.requests.handle_message(&message) {
            return;
        }

        if self.push_router.handle_message(&message) {
            return;
        }

        match message {
            IncomingMessage::System(system) if system.event.as_deref() == Some("session_revoked") => {
                let reason = system
                    .reason
                    .unwrap_or_else(|| DEFAULT_REVOKE_REASON.to_string());
                tracing::warn!(reason = %reason, "Session revoked by server");
                self.connection.set_intentional(true);
                self.events.emit(ClientEvent::SessionRevoked { reason });
            }
            other => tracing::trace!(kind = other.kind(), "Unhandled message"),
        }
    }

    fn on_close(&self, code: u16, reason: String) {
        let intentional = self.connection.is_intentional();
        tracing::info!(code, reason = %reason, intentional, "Connection closed");

        if let Some(waiter) = self.welcome_waiter.lock().take() {
            let _ = waiter.send(Err(Error::Connection(format!(
                "Connection closed before welcome (code {})",
                code
            ))));
        }

        let lost = if intentional { "Connection closed" } else { "Connection lost" };
        self.requests.reject_all(Error::Disconnected(lost.to_string()));

        // The flow that owns the handshake handles it when done
        if self.connection.defer_close(code, &reason) {
            return;
        }

        self.handle_close(code, reason);
    }

    /// Reconnect or report `Disconnected` after the socket went away
    fn handle_close(&self, code: u16, reason: String) {
        if self.connection.is_reconnecting() {
            return;
        }

        let intentional = self.connection.is_intentional();
        let label = self.options.non_retryable_label(code).map(str::to_string);

        if !intentional && label.is_none() && self.strategy.is_some() {
            self.spawn_reconnect();
            return;
        }

        let reason = if !reason.is_empty() {
            reason
        } else {
            label.unwrap_or_else(|| format!("Connection closed with code {}", code))
        };

        self.set_state(ConnectionState::Disconnected);
        self.events.emit(ClientEvent::Disconnected { reason });
    }

    fn spawn_reconnect(&self) {
        if !self.connection.try_begin_reconnect() {
            return;
        }

        let Some(inner) = self.this.upgrade() else {
            self.connection.end_reconnect();
            return;
        };

        self.set_state(ConnectionState::Reconnecting);
        tokio::spawn(inner.run_reconnect());
    }

    async fn run_reconnect(self: Arc<Self>) {
        let Some(strategy) = self.strategy.clone() else {
            self.connection.end_reconnect();
            return;
        };

        let mut attempt: u32 = 0;

        while !self.connection.is_intentional() {
            let Some(delay) = strategy.next_delay(attempt) else {
                tracing::error!(attempts = attempt, "Reconnection abandoned");
                self.connection.end_reconnect();
                self.connection.finish_handshake();
                self.set_state(ConnectionState::Disconnected);
                self.events.emit(ClientEvent::Disconnected {
                    reason: MAX_ATTEMPTS_REASON.to_string(),
                });
                self.events.emit(ClientEvent::Error(Error::Connection(
                    MAX_ATTEMPTS_REASON.to_string(),
                )));
                return;
            };

            tracing::info!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Reconnecting");
            self.events.emit(ClientEvent::Reconnecting { attempt: attempt + 1 });
            if let Some(ref m) = self.metrics {
                m.record_reconnection_attempt();
            }

            if !self.connection.wait_or_abort(delay).await || self.connection.is_intentional() {
                break;
            }

            match self.establish().await {
                Ok(welcome) if self.connection.is_intentional() => {
                    tracing::debug!(version = %welcome.version, "Reconnected after disconnect, closing");
                    self.transport.disconnect(CLOSE_NORMAL, "Client disconnect").await;
                    break;
                }
                Ok(welcome) => {
                    let report = self
                        .subscriptions
                        .resubscribe_all(|request_type, payload| {
                            let inner = self.clone();
                            async move { inner.request(&request_type, payload).await }
                        })
                        .await;

                    if let Some(ref m) = self.metrics {
                        m.record_resubscribe_failures(report.failed as u64);
                    }

                    if self.connection.is_intentional() {
                        break;
                    }

                    if let Some((code, reason)) = self.connection.take_deferred_close() {
                        if self.options.non_retryable_label(code).is_some() {
                            self.abandon_reconnect(code, reason);
                            return;
                        }
                        tracing::warn!(attempt = attempt + 1, code, "Connection lost while restoring subscriptions");
                        if !self.connection.is_intentional() {
                            self.set_state(ConnectionState::Reconnecting);
                        }
                        attempt += 1;
                        continue;
                    }

                    tracing::info!(
                        attempt = attempt + 1,
                        restored = report.restored,
                        failed = report.failed,
                        "Reconnected"
                    );
                    if let Some(ref m) = self.metrics {
                        m.record_reconnection_success();
                    }

                    self.events.emit(ClientEvent::Connected);
                    self.events.emit(ClientEvent::Reconnected);
                    self.events.emit(ClientEvent::Welcome(welcome));

                    self.connection.end_reconnect();
                    if let Some((code, reason)) = self.connection.finish_handshake() {
                        tracing::warn!(code, "Connection closed right after reconnecting");
                        self.handle_close(code, reason);
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Reconnect attempt failed");
                    if let Some(ref m) = self.metrics {
                        m.record_error(e.code());
                    }
                    self.transport.disconnect(CLOSE_NORMAL, "Reconnect attempt failed").await;
                    if let Some((code, reason)) = self.connection.take_deferred_close() {
                        if self.options.non_retryable_label(code).is_some() {
                            self.abandon_reconnect(code, reason);
                            return;
                        }
                    }
                    if !self.connection.is_intentional() {
                        self.set_state(ConnectionState::Reconnecting);
                    }
                    attempt += 1;
                }
            }
        }

        tracing::debug!("Reconnect loop aborted");
        self.connection.end_reconnect();
        // A connect() issued after disconnect() owns the state now
        if !self.connection.is_connecting() {
            self.connection.finish_handshake();
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Leave the reconnect loop for a close that must not be retried
    fn abandon_reconnect(&self, code: u16, reason: String) {
        tracing::warn!(code, "Server refused the reconnect");
        self.connection.end_reconnect();
        self.connection.finish_handshake();
        self.handle_close(code, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectOptions;
    use std::time::Duration;

    #[test]
    fn test_new_client_is_disconnected() {
        let client = NoexClient::new("ws://localhost:8080", ClientOptions::default());

        assert_eq!(client.url(), "ws://localhost:8080");
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert_eq!(client.pending_requests(), 0);
        assert_eq!(client.subscription_count(), 0);
    }

    #[test]
    fn test_reconnect_strategy_follows_options() {
        let client = NoexClient::new("ws://localhost:8080", ClientOptions::default());
        assert!(client.inner.strategy.is_some());

        let options = ClientOptions {
            reconnect: None,
            ..Default::default()
        };
        let client = NoexClient::new("ws://localhost:8080", options);
        assert!(client.inner.strategy.is_none());
    }

    #[tokio::test]
    async fn test_request_while_disconnected() {
        let client = NoexClient::new("ws://localhost:8080", ClientOptions::default());

        let err = client.request("store.all", json!({"bucket": "users"})).await.unwrap_err();
        assert!(matches!(err, Error::Disconnected(_)));
        assert_eq!(err.code(), "DISCONNECTED");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = NoexClient::new("ws://localhost:8080", ClientOptions::default());

        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused_leaves_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let options = ClientOptions {
            reconnect: Some(ReconnectOptions::default()),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let client = NoexClient::new(format!("ws://{}", addr), options);

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_clones_share_state() {
        let client = NoexClient::new("ws://localhost:8080", ClientOptions::default());
        let clone = client.clone();

        client.inner.set_state(ConnectionState::Reconnecting);
        assert_eq!(clone.state(), ConnectionState::Reconnecting);
    }
}
