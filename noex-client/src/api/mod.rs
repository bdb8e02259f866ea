//! Domain APIs
//!
//! Thin wrappers that turn method calls into `request(type, payload)`.
//! Results stay untyped [`serde_json::Value`]s.

mod auth;
mod procedures;
mod rules;
mod store;

pub use auth::{AuthApi, SessionInfo};
pub use procedures::ProceduresApi;
pub use rules::RulesApi;
pub use store::{BucketApi, StoreApi};

use crate::subscription::SubscriptionKey;
use crate::NoexClient;
use serde_json::json;

/// Live store or rules subscription
///
/// Dropping the handle keeps the subscription; call
/// [`unsubscribe`](Self::unsubscribe) to end it.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    client: NoexClient,
    key: SubscriptionKey,
    unsubscribe_type: &'static str,
}

impl SubscriptionHandle {
    pub(crate) fn new(client: NoexClient, key: SubscriptionKey, unsubscribe_type: &'static str) -> Self {
        Self {
            client,
            key,
            unsubscribe_type,
        }
    }

    /// Current server-side ID; changes after a reconnect
    ///
    /// `None` once the subscription has ended.
    pub fn id(&self) -> Option<String> {
        self.client.subscriptions().current_id(self.key)
    }

    pub fn is_active(&self) -> bool {
        self.id().is_some()
    }

    /// Stop local delivery and tell the server in the background
    ///
    /// The server is notified by a detached task whose outcome is discarded,
    /// so the server-side subscription may outlive this call briefly. Must be
    /// called within a Tokio runtime. Further calls do nothing.
    pub fn unsubscribe(&self) {
        let Some(id) = self.client.subscriptions().unregister_key(self.key) else {
            return;
        };

        let client = self.client.clone();
        let request_type = self.unsubscribe_type;
        tokio::spawn(async move {
            if let Err(e) = client.request(request_type, json!({ "subscriptionId": id })).await {
                tracing::debug!(subscription_id = %id, error = %e, "Unsubscribe notification failed");
            }
        });
    }

    /// Stop local delivery and wait for the server to confirm
    ///
    /// A no-op returning `Ok` when the subscription already ended.
    pub async fn unsubscribe_await(&self) -> noex_core::Result<()> {
        let Some(id) = self.client.subscriptions().unregister_key(self.key) else {
            return Ok(());
        };

        self.client
            .request(self.unsubscribe_type, json!({ "subscriptionId": id }))
            .await?;
        Ok(())
    }
}
