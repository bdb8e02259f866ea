//! Request tracking
//!
//! Correlates outgoing requests with the replies that arrive, in any order,
//! on the shared socket.
//!
//! # Request Lifecycle
//!
//! 1. **Allocate**: take the next ID from an atomic counter (starting at 1)
//! 2. **Register**: store a oneshot sender and spawn the timeout task
//! 3. **Send**: hand the encoded frame to the [`MessageSink`]
//! 4. **Settle**: the first of reply, timeout or `reject_all` removes the
//!    entry and completes the oneshot; the others find nothing to do
//!
//! The table lock is never held while a caller is woken or while awaiting.

use noex_core::{codec, Error, IncomingMessage, ResponseBody, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Anything that can put a text frame on the wire
pub trait MessageSink: Send + Sync {
    /// Queue a frame; must not block
    fn send_text(&self, text: String) -> Result<()>;
}

struct PendingRequest {
    tx: oneshot::Sender<Result<Value>>,
    msg_type: String,
    timer: JoinHandle<()>,
}

type PendingTable = Arc<Mutex<HashMap<u64, PendingRequest>>>;

/// Manager for tracking pending requests
pub struct RequestManager {
    pending: PendingTable,
    next_id: AtomicU64,
    timeout: Duration,
}

/// Removes the pending entry if the caller stops waiting
struct PendingGuard {
    pending: PendingTable,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(entry) = self.pending.lock().remove(&self.id) {
            entry.timer.abort();
        }
    }
}

impl RequestManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a request and wait for its reply
    ///
    /// # Errors
    ///
    /// - `Error::Server` when the server answers with an `error` frame
    /// - `Error::RequestTimeout` when no reply arrives in time
    /// - `Error::UnexpectedResponse` for a reply of another kind
    /// - whatever the sink returns when the frame cannot be queued
    /// - the error passed to `reject_all`
    pub async fn send(&self, sink: &dyn MessageSink, msg_type: &str, payload: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = codec::encode_request(id, msg_type, &payload)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            let timer = self.spawn_timer(id, msg_type.to_string());
            pending.insert(
                id,
                PendingRequest {
                    tx,
                    msg_type: msg_type.to_string(),
                    timer,
                },
            );
        }

        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id,
        };

        sink.send_text(frame)?;

        tracing::trace!(id, request_type = %msg_type, "Request sent");

        rx.await
            .map_err(|_| Error::Internal("Request channel closed".to_string()))?
    }

    fn spawn_timer(&self, id: u64, msg_type: String) -> JoinHandle<()> {
        let pending = self.pending.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let entry = pending.lock().remove(&id);
            if let Some(entry) = entry {
                let _ = entry.tx.send(Err(Error::RequestTimeout(format!(
                    "Request {} (id={}) timed out after {}ms",
                    msg_type,
                    id,
                    timeout.as_millis()
                ))));
            }
        })
    }

    /// Settle the pending request a reply belongs to
    ///
    /// Returns `false` for anything that is not a reply, and for replies to
    /// IDs that are not pending (already settled or never sent).
    pub fn handle_message(&self, msg: &IncomingMessage) -> bool {
        let (id, body) = match msg {
            IncomingMessage::Response { id, body } => (*id, body),
            _ => return false,
        };

        let entry = match self.pending.lock().remove(&id) {
            Some(entry) => entry,
            None => return false,
        };
        entry.timer.abort();

        let result = match body {
            ResponseBody::Result(data) => Ok(data.clone()),
            ResponseBody::Error(err) => Err(Error::Server(err.clone())),
            ResponseBody::Unexpected(kind) => Err(Error::UnexpectedResponse(format!(
                "Unexpected response type \"{}\" for {} (id={})",
                kind, entry.msg_type, id
            ))),
        };

        let _ = entry.tx.send(result);
        true
    }

    /// Fail every pending request with `error`
    pub fn reject_all(&self, error: Error) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };

        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), error = %error, "Rejecting pending requests");
        }

        for entry in drained {
            entry.timer.abort();
            let _ = entry.tx.send(Err(error.clone()));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
