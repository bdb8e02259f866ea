//! Push notification routing
//!
//! Forwards validated `push` frames to a single handler. The decoder already
//! rejected malformed pushes (they arrive as `IncomingMessage::Unknown`), so
//! the router only has to pick out the `Push` variant.

use noex_core::IncomingMessage;
use serde_json::Value;
use std::sync::Arc;

/// Callback receiving `(subscription_id, channel, data)`
pub type PushHandler = Arc<dyn Fn(&str, &str, Value) + Send + Sync>;

pub struct PushRouter {
    on_push: PushHandler,
}

impl PushRouter {
    pub fn new<F>(on_push: F) -> Self
    where
        F: Fn(&str, &str, Value) + Send + Sync + 'static,
    {
        Self {
            on_push: Arc::new(on_push),
        }
    }

    /// Dispatch a push; `false` without side effects for anything else
    pub fn handle_message(&self, msg: &IncomingMessage) -> bool {
        match msg {
            IncomingMessage::Push(push) => {
                tracing::trace!(
                    subscription_id = %push.subscription_id,
                    channel = %push.channel,
                    "Push received"
                );
                (self.on_push)(&push.subscription_id, &push.channel, push.data.clone());
                true
            }
            _ => false,
        }
    }
}
