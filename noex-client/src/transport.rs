//! WebSocket transport
//!
//! Owns one physical connection at a time. Each connection gets two tasks:
//!
//! - **writer**: drains an unbounded queue of outgoing frames into the sink,
//!   so `send_text` never blocks and never needs a lock across an await
//! - **reader**: answers heartbeat pings, forwards every other text frame as
//!   [`TransportEvent::Message`] and reports the close
//!
//! Events go to a single handler fixed at construction. The handler runs on
//! the reader task, so it must not block.

use crate::connection_state::TransportState;
use crate::request::MessageSink;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use noex_core::{codec, Error, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer's close frame carried no status
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Close code reported when the connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// How long to wait for the socket to finish closing after a close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Close { code: u16, reason: String },
    Error(String),
}

pub type TransportHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

struct Link {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub struct WebSocketTransport {
    url: String,
    connect_timeout: Duration,
    heartbeat: bool,
    handler: TransportHandler,
    state: Arc<RwLock<TransportState>>,
    link: Arc<Mutex<Option<Link>>>,
    generation: AtomicU64,
}

impl WebSocketTransport {
    pub fn new(
        url: impl Into<String>,
        connect_timeout: Duration,
        heartbeat: bool,
        handler: TransportHandler,
    ) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            heartbeat,
            handler,
            state: Arc::new(RwLock::new(TransportState::Idle)),
            link: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> TransportState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    /// Open the socket; a no-op while already connecting or connected
    ///
    /// # Errors
    ///
    /// `Error::Connection` when the handshake fails or does not finish
    /// within the connect timeout.
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if matches!(*state, TransportState::Connecting | TransportState::Connected) {
                return Ok(());
            }
            *state = TransportState::Connecting;
        }

        let ws_stream = match tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(e)) => {
                *self.state.write() = TransportState::Disconnected;
                tracing::debug!(error = %e, "WebSocket handshake failed");
                return Err(Error::Connection(e.to_string()));
            }
            Err(_) => {
                *self.state.write() = TransportState::Disconnected;
                return Err(Error::Connection(format!(
                    "Connect timeout after {}ms",
                    self.connect_timeout.as_millis()
                )));
            }
        };

        let (sink, stream) = ws_stream.split();
        let (outgoing, queue) = mpsc::unbounded_channel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let writer = tokio::spawn(write_loop(sink, queue));

        // The reader takes this lock before reporting a close, so it cannot
        // observe the link or the state before both are installed
        let previous = {
            let mut link = self.link.lock();

            let reader = tokio::spawn(read_loop(ReadContext {
                stream,
                outgoing: outgoing.clone(),
                heartbeat: self.heartbeat,
                handler: self.handler.clone(),
                state: self.state.clone(),
                link: self.link.clone(),
                generation,
            }));

            let previous = link.replace(Link {
                generation,
                outgoing,
                reader,
                writer,
            });
            *self.state.write() = TransportState::Connected;
            previous
        };

        if let Some(stale) = previous {
            stale.reader.abort();
            stale.writer.abort();
        }

        tracing::debug!("WebSocket connected");
        (self.handler)(TransportEvent::Open);

        Ok(())
    }

    /// Close the socket from our side
    ///
    /// No `Close` event is emitted. A no-op when idle or already disconnected.
    pub async fn disconnect(&self, code: u16, reason: &str) {
        {
            let mut state = self.state.write();
            if matches!(*state, TransportState::Idle | TransportState::Disconnected) {
                return;
            }
            *state = TransportState::Disconnected;
        }

        let link = self.link.lock().take();
        let Some(mut link) = link else {
            return;
        };

        link.reader.abort();

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = link.outgoing.send(Message::Close(Some(frame)));
        drop(link.outgoing);

        if tokio::time::timeout(CLOSE_GRACE, &mut link.writer).await.is_err() {
            link.writer.abort();
        }

        tracing::debug!(code, reason = %reason, "WebSocket closed by client");
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link.lock().take() {
            link.reader.abort();
            link.writer.abort();
        }
    }
}

impl MessageSink for WebSocketTransport {
    fn send_text(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Disconnected("Transport is not connected".to_string()));
        }

        let link = self.link.lock();
        let link = link
            .as_ref()
            .ok_or_else(|| Error::Disconnected("Transport is not connected".to_string()))?;

        link.outgoing
            .send(Message::Text(text))
            .map_err(|_| Error::Disconnected("Transport is not connected".to_string()))
    }
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut queue: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = queue.recv().await {
        let closing = matches!(message, Message::Close(_));

        if let Err(e) = sink.send(message).await {
            tracing::debug!(error = %e, "WebSocket write failed");
            break;
        }

        if closing {
            break;
        }
    }

    let _ = sink.close().await;
}

struct ReadContext {
    stream: SplitStream<WsStream>,
    outgoing: mpsc::UnboundedSender<Message>,
    heartbeat: bool,
    handler: TransportHandler,
    state: Arc<RwLock<TransportState>>,
    link: Arc<Mutex<Option<Link>>>,
    generation: u64,
}

impl ReadContext {
    fn deliver(&self, text: String) {
        if self.heartbeat {
            if let Some(timestamp) = codec::heartbeat_timestamp(&text) {
                let _ = self.outgoing.send(Message::Text(codec::encode_pong(&timestamp)));
                return;
            }
        }

        (self.handler)(TransportEvent::Message(text));
    }
}

async fn read_loop(mut ctx: ReadContext) {
    let mut close_frame: Option<(u16, String)> = None;

    let (code, reason) = loop {
        let next = if close_frame.is_some() {
            // Close handshake in progress; let tungstenite flush its reply
            match tokio::time::timeout(CLOSE_GRACE, ctx.stream.next()).await {
                Ok(next) => next,
                Err(_) => None,
            }
        } else {
            ctx.stream.next().await
        };

        match next {
            Some(Ok(Message::Text(text))) => ctx.deliver(text),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => ctx.deliver(text),
                Err(_) => tracing::warn!("Dropping non UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                let received = frame
                    .map(|f| (u16::from(f.code), f.reason.into_owned()))
                    .unwrap_or((CLOSE_NO_STATUS, String::new()));
                close_frame.get_or_insert(received);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                if !is_drop(&e) {
                    tracing::warn!(error = %e, "WebSocket error");
                    (ctx.handler)(TransportEvent::Error(e.to_string()));
                }
                break close_frame.take().unwrap_or((CLOSE_ABNORMAL, String::new()));
            }
            None => break close_frame.take().unwrap_or((CLOSE_ABNORMAL, String::new())),
        }
    };

    {
        let mut link = ctx.link.lock();
        if link.as_ref().map(|l| l.generation) != Some(ctx.generation) {
            // Superseded by disconnect() or a newer connection
            return;
        }
        // Dropping the queue lets the writer finish
        link.take();
        *ctx.state.write() = TransportState::Disconnected;
    }

    tracing::debug!(code, reason = %reason, "WebSocket closed");
    (ctx.handler)(TransportEvent::Close { code, reason });
}

fn is_drop(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Io(_)
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}
