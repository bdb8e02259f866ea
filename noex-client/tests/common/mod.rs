//! Common test utilities for noex-client integration tests
//!
//! A mock noex server on a local port: it greets every connection with a
//! `welcome`, records every frame it receives and answers requests through a
//! pluggable handler. Tests can also push, close and refuse connections.
//!
//! Client logs go to the test output; set `RUST_LOG=noex_client=debug` to
//! see them.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use noex_client::{ClientEvent, EventKind, NoexClient};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the mock server does with one request
pub enum Reply {
    Result(Value),
    Error {
        code: &'static str,
        message: &'static str,
        details: Option<Value>,
    },
    /// Answer with a result after a delay, without blocking other requests
    After(Duration, Value),
    /// Send this frame verbatim
    Raw(String),
    /// Close the connection with this code and reason
    Close(u16, &'static str),
    /// Never answer
    Silent,
}

type Handler = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

struct ServerState {
    handler: Handler,
    requires_auth: AtomicBool,
    send_welcome: AtomicBool,
    close_after_welcome: Mutex<Option<(u16, &'static str)>>,
    accepting: AtomicBool,
    accepted: AtomicUsize,
    received: Mutex<Vec<Value>>,
    connections: Mutex<HashMap<usize, mpsc::UnboundedSender<Message>>>,
}

/// Mock noex server for client testing
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl MockServer {
    /// Start a server answering with [`Backend`]
    pub async fn start() -> Self {
        let backend = Backend::new();
        Self::with_handler(move |request| backend.handle(request)).await
    }

    /// Start a server with a custom request handler
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&Value) -> Reply + Send + Sync + 'static,
    {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(ServerState {
            handler: Arc::new(handler),
            requires_auth: AtomicBool::new(false),
            send_welcome: AtomicBool::new(true),
            close_after_welcome: Mutex::new(None),
            accepting: AtomicBool::new(true),
            accepted: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            connections: Mutex::new(HashMap::new()),
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if !accept_state.accepting.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self { addr, state }
    }

    /// Get the WebSocket URL for connecting to this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn set_requires_auth(&self, requires_auth: bool) {
        self.state.requires_auth.store(requires_auth, Ordering::SeqCst);
    }

    pub fn set_send_welcome(&self, send_welcome: bool) {
        self.state.send_welcome.store(send_welcome, Ordering::SeqCst);
    }

    /// Close every new connection right after its welcome
    pub fn set_close_after_welcome(&self, close: Option<(u16, &'static str)>) {
        *self.state.close_after_welcome.lock() = close;
    }

    /// Refuse new connections by dropping them before the handshake
    pub fn set_accepting(&self, accepting: bool) {
        self.state.accepting.store(accepting, Ordering::SeqCst);
    }

    /// WebSocket connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    pub fn live_connections(&self) -> usize {
        self.state.connections.lock().len()
    }

    /// Every frame received, in order
    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().clone()
    }

    /// Received frames of one `type`
    pub fn requests_of(&self, request_type: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|frame| frame["type"] == request_type)
            .collect()
    }

    /// Send a frame to every live connection
    pub fn send_all(&self, text: &str) {
        for tx in self.state.connections.lock().values() {
            let _ = tx.send(Message::Text(text.to_string()));
        }
    }

    pub fn push(&self, subscription_id: &str, channel: &str, data: Value) {
        let frame = json!({
            "type": "push",
            "subscriptionId": subscription_id,
            "channel": channel,
            "data": data,
        });
        self.send_all(&frame.to_string());
    }

    /// Close every live connection with a close frame
    pub fn close_all(&self, code: u16, reason: &str) {
        for tx in self.state.connections.lock().values() {
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            })));
        }
    }
}

async fn serve(stream: TcpStream, state: Arc<ServerState>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let conn_id = state.accepted.fetch_add(1, Ordering::SeqCst);
    state.connections.lock().insert(conn_id, tx.clone());

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    if state.send_welcome.load(Ordering::SeqCst) {
        let welcome = json!({
            "type": "welcome",
            "version": "1.0.0",
            "serverTime": 1_700_000_000_000i64,
            "requiresAuth": state.requires_auth.load(Ordering::SeqCst),
        });
        let _ = tx.send(Message::Text(welcome.to_string()));
    }

    if let Some((code, reason)) = *state.close_after_welcome.lock() {
        let _ = tx.send(Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })));
    }

    while let Some(Ok(message)) = source.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };

        state.received.lock().push(frame.clone());
        if frame["type"] == "pong" {
            continue;
        }

        let id = frame.get("id").cloned().unwrap_or(Value::Null);
        match (state.handler)(&frame) {
            Reply::Result(data) => {
                let reply = json!({"id": id, "type": "result", "data": data});
                let _ = tx.send(Message::Text(reply.to_string()));
            }
            Reply::Error { code, message, details } => {
                let mut reply = json!({"id": id, "type": "error", "code": code, "message": message});
                if let Some(details) = details {
                    reply["details"] = details;
                }
                let _ = tx.send(Message::Text(reply.to_string()));
            }
            Reply::After(delay, data) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let reply = json!({"id": id, "type": "result", "data": data});
                    let _ = tx.send(Message::Text(reply.to_string()));
                });
            }
            Reply::Raw(text) => {
                let _ = tx.send(Message::Text(text));
            }
            Reply::Close(code, reason) => {
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                })));
            }
            Reply::Silent => {}
        }
    }

    state.connections.lock().remove(&conn_id);
}

/// Request handler behaving like a small noex server
///
/// - `store.subscribe` / `rules.subscribe` hand out `sub-N` IDs; store
///   subscriptions answer with `{"query", "generation": N}` as data
/// - `auth.login` accepts the tokens `valid` and `session-token`
/// - `identity.login` accepts password `pw` and returns `session-token`
/// - `auth.whoami` reports `u-1` after a successful login
/// - anything else echoes `{"type", "payload"}`
pub struct Backend {
    next_subscription: AtomicUsize,
    logged_in: AtomicBool,
}

impl Backend {
    pub fn new() -> Self {
        Self {
            next_subscription: AtomicUsize::new(1),
            logged_in: AtomicBool::new(false),
        }
    }

    pub fn handle(&self, request: &Value) -> Reply {
        let request_type = request["type"].as_str().unwrap_or_default();

        match request_type {
            "store.subscribe" => {
                let n = self.next_subscription.fetch_add(1, Ordering::SeqCst);
                Reply::Result(json!({
                    "subscriptionId": format!("sub-{}", n),
                    "data": {"query": request["query"], "generation": n},
                }))
            }
            "rules.subscribe" => {
                let n = self.next_subscription.fetch_add(1, Ordering::SeqCst);
                Reply::Result(json!({"subscriptionId": format!("sub-{}", n)}))
            }
            "store.unsubscribe" | "rules.unsubscribe" => Reply::Result(json!({"unsubscribed": true})),
            "auth.login" => match request["token"].as_str() {
                Some("valid") | Some("session-token") => {
                    self.logged_in.store(true, Ordering::SeqCst);
                    Reply::Result(json!({"userId": "u-1", "roles": ["admin"]}))
                }
                _ => Reply::Error {
                    code: "UNAUTHORIZED",
                    message: "Invalid token",
                    details: None,
                },
            },
            "identity.login" => {
                if request["password"] == "pw" {
                    self.logged_in.store(true, Ordering::SeqCst);
                    Reply::Result(json!({"token": "session-token", "userId": "u-1"}))
                } else {
                    Reply::Error {
                        code: "INVALID_CREDENTIALS",
                        message: "Invalid username or password",
                        details: None,
                    }
                }
            }
            "auth.logout" => {
                self.logged_in.store(false, Ordering::SeqCst);
                Reply::Result(Value::Null)
            }
            "auth.whoami" => {
                if self.logged_in.load(Ordering::SeqCst) {
                    Reply::Result(json!({
                        "authenticated": true,
                        "userId": "u-1",
                        "roles": ["admin"],
                        "expiresAt": 1_800_000_000_000i64,
                    }))
                } else {
                    Reply::Result(json!({"authenticated": false}))
                }
            }
            _ => {
                let mut payload = request.clone();
                if let Some(obj) = payload.as_object_mut() {
                    obj.remove("id");
                    obj.remove("type");
                }
                Reply::Result(json!({"type": request_type, "payload": payload}))
            }
        }
    }
}

/// Every event the client emitted, in order
pub fn record_events(client: &NoexClient) -> Arc<Mutex<Vec<ClientEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));

    for kind in [
        EventKind::Connected,
        EventKind::Welcome,
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::Reconnected,
        EventKind::Error,
        EventKind::SessionRevoked,
    ] {
        let sink = events.clone();
        client.on(kind, move |event| sink.lock().push(event.clone()));
    }

    events
}

/// Kinds of the recorded events, in order
pub fn kinds(events: &Mutex<Vec<ClientEvent>>) -> Vec<EventKind> {
    events.lock().iter().map(ClientEvent::kind).collect()
}

/// Poll `condition` every 10ms, panicking after 5 seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}
