//! Subscription tracking
//!
//! Keeps one entry per live server-side subscription, routes pushes to the
//! matching callback and re-establishes every entry after a reconnect.
//!
//! # Identity
//!
//! Entries are keyed by the server-assigned subscription ID, which changes on
//! every resubscribe. Each entry also carries a client-side
//! [`SubscriptionKey`] that never changes, so an unsubscribe handle created
//! before a reconnect still finds its entry afterwards.
//!
//! # Resubscribe
//!
//! After a reconnect the old server IDs are meaningless. `resubscribe_all`
//! parks every entry outside the ID table, replays each stored request
//! against the new connection, files the entry under the new ID and delivers
//! the fresh initial data. Entries that fail to resubscribe are dropped;
//! entries unregistered while their resubscribe was in flight stay gone.

use crate::guard::call_guarded;
use noex_core::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked with each pushed value
pub type SubscriptionCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Stable client-side identity of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(u64);

/// Request that recreates a subscription on a fresh connection
#[derive(Debug, Clone, PartialEq)]
pub struct ResubscribeInfo {
    pub request_type: String,
    pub payload: Value,
}

impl ResubscribeInfo {
    pub fn new(request_type: impl Into<String>, payload: Value) -> Self {
        Self {
            request_type: request_type.into(),
            payload,
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionEntry {
    /// Server-assigned subscription ID
    pub id: String,
    /// `subscription` for store queries, `event` for rules patterns
    pub channel: String,
    pub callback: SubscriptionCallback,
    pub resubscribe: ResubscribeInfo,
}

impl SubscriptionEntry {
    pub fn new<F>(
        id: impl Into<String>,
        channel: impl Into<String>,
        callback: F,
        resubscribe: ResubscribeInfo,
    ) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            channel: channel.into(),
            callback: Arc::new(callback),
            resubscribe,
        }
    }
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("resubscribe", &self.resubscribe)
            .finish_non_exhaustive()
    }
}

struct Slot {
    key: SubscriptionKey,
    entry: SubscriptionEntry,
}

/// Outcome of a `resubscribe_all` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResubscribeReport {
    pub restored: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Table {
    /// Entries reachable by their current server ID
    live: HashMap<String, Slot>,
    /// Entries whose resubscribe is in flight; their old IDs are stale
    restoring: HashMap<SubscriptionKey, Slot>,
}

impl Table {
    fn live_key(&self, key: SubscriptionKey) -> Option<&str> {
        self.live
            .iter()
            .find(|(_, slot)| slot.key == key)
            .map(|(id, _)| id.as_str())
    }
}

pub struct SubscriptionManager {
    table: Mutex<Table>,
    next_key: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            next_key: AtomicU64::new(1),
        }
    }

    /// Track a subscription; an entry with the same ID is replaced
    pub fn register(&self, entry: SubscriptionEntry) -> SubscriptionKey {
        let key = SubscriptionKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(subscription_id = %entry.id, channel = %entry.channel, "Subscription registered");
        self.table.lock().live.insert(entry.id.clone(), Slot { key, entry });
        key
    }

    pub fn unregister(&self, subscription_id: &str) {
        if self.table.lock().live.remove(subscription_id).is_some() {
            tracing::debug!(subscription_id = %subscription_id, "Subscription unregistered");
        }
    }

    /// Remove by stable key, returning the entry's current server ID
    pub fn unregister_key(&self, key: SubscriptionKey) -> Option<String> {
        let mut table = self.table.lock();
        if let Some(id) = table.live_key(key).map(str::to_string) {
            table.live.remove(&id);
            return Some(id);
        }
        table.restoring.remove(&key).map(|slot| slot.entry.id)
    }

    /// Current server ID of the entry behind `key`
    pub fn current_id(&self, key: SubscriptionKey) -> Option<String> {
        let table = self.table.lock();
        table
            .live_key(key)
            .map(str::to_string)
            .or_else(|| table.restoring.get(&key).map(|slot| slot.entry.id.clone()))
    }

    /// Deliver a push; unknown IDs are dropped silently
    pub fn handle_push(&self, subscription_id: &str, data: Value) {
        let callback = match self.table.lock().live.get(subscription_id) {
            Some(slot) => slot.entry.callback.clone(),
            None => return,
        };

        call_guarded(subscription_id, || callback(data));
    }

    /// Recreate every subscription through `send`
    ///
    /// `send(request_type, payload)` must resolve to the server's reply,
    /// which carries the new `subscriptionId` and optionally `data`.
    ///
    /// All entries leave the live table before the first request goes out,
    /// so a new ID that equals some other entry's old ID cannot clobber it.
    pub async fn resubscribe_all<F, Fut>(&self, send: F) -> ResubscribeReport
    where
        F: Fn(String, Value) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let pending: Vec<(SubscriptionKey, String, ResubscribeInfo)> = {
            let mut table = self.table.lock();
            let drained: Vec<Slot> = table.live.drain().map(|(_, slot)| slot).collect();
            drained
                .into_iter()
                .map(|slot| {
                    let item = (slot.key, slot.entry.id.clone(), slot.entry.resubscribe.clone());
                    table.restoring.insert(slot.key, slot);
                    item
                })
                .collect()
        };

        let mut report = ResubscribeReport::default();

        for (key, old_id, info) in pending {
            let outcome = send(info.request_type.clone(), info.payload.clone()).await;

            let new_id = match &outcome {
                Ok(reply) => reply.get("subscriptionId").and_then(Value::as_str).map(str::to_string),
                Err(_) => None,
            };

            let mut table = self.table.lock();
            let Some(mut slot) = table.restoring.remove(&key) else {
                tracing::debug!(subscription_id = %old_id, "Subscription removed during resubscribe");
                continue;
            };

            let Some(new_id) = new_id else {
                drop(table);
                match &outcome {
                    Err(e) => tracing::warn!(
                        subscription_id = %old_id,
                        request_type = %info.request_type,
                        error = %e,
                        "Failed to resubscribe, dropping subscription"
                    ),
                    Ok(_) => tracing::warn!(
                        subscription_id = %old_id,
                        request_type = %info.request_type,
                        "Resubscribe reply without subscriptionId, dropping subscription"
                    ),
                }
                report.failed += 1;
                continue;
            };

            slot.entry.id = new_id.clone();
            let callback = slot.entry.callback.clone();
            if table.live.insert(new_id.clone(), slot).is_some() {
                tracing::warn!(subscription_id = %new_id, "Server reused a live subscription ID");
            }
            drop(table);

            tracing::debug!(old_id = %old_id, new_id = %new_id, "Subscription restored");
            report.restored += 1;

            if let Some(data) = outcome.ok().and_then(|mut reply| reply.get_mut("data").map(Value::take)) {
                call_guarded(&new_id, || callback(data));
            }
        }

        report
    }

    pub fn clear(&self) {
        let mut table = self.table.lock();
        table.live.clear();
        table.restoring.clear();
    }

    pub fn count(&self) -> usize {
        let table = self.table.lock();
        table.live.len() + table.restoring.len()
    }

    pub fn ids(&self) -> Vec<String> {
        let table = self.table.lock();
        table
            .live
            .keys()
            .cloned()
            .chain(table.restoring.values().map(|slot| slot.entry.id.clone()))
            .collect()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noex_core::Error;
    use serde_json::json;

    fn collector() -> (impl Fn(Value) + Send + Sync + 'static, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (move |value| sink.lock().push(value), seen)
    }

    fn store_entry<F>(id: &str, query: &str, callback: F) -> SubscriptionEntry
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        SubscriptionEntry::new(
            id,
            "subscription",
            callback,
            ResubscribeInfo::new("store.subscribe", json!({"query": query})),
        )
    }

    #[test]
    fn test_push_routing() {
        let manager = SubscriptionManager::new();
        let (callback, seen) = collector();
        manager.register(store_entry("sub-1", "all-users", callback));

        manager.handle_push("sub-1", json!([1]));
        manager.handle_push("unknown", json!([2]));

        assert_eq!(*seen.lock(), vec![json!([1])]);
    }

    #[test]
    fn test_register_same_id_replaces() {
        let manager = SubscriptionManager::new();
        let (first, first_seen) = collector();
        let (second, second_seen) = collector();

        manager.register(store_entry("sub-1", "a", first));
        manager.register(store_entry("sub-1", "b", second));
        assert_eq!(manager.count(), 1);

        manager.handle_push("sub-1", json!("x"));
        assert!(first_seen.lock().is_empty());
        assert_eq!(second_seen.lock().len(), 1);
    }

    #[test]
    fn test_unregister() {
        let manager = SubscriptionManager::new();
        let (callback, seen) = collector();
        let key = manager.register(store_entry("sub-1", "a", callback));

        manager.unregister("missing");
        assert_eq!(manager.count(), 1);

        assert_eq!(manager.unregister_key(key), Some("sub-1".to_string()));
        assert_eq!(manager.unregister_key(key), None);

        manager.handle_push("sub-1", json!(1));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let manager = SubscriptionManager::new();
        let (callback, seen) = collector();

        manager.register(store_entry("bad", "a", |_| panic!("boom")));
        manager.register(store_entry("good", "b", callback));

        manager.handle_push("bad", json!(1));
        manager.handle_push("good", json!(2));

        assert_eq!(*seen.lock(), vec![json!(2)]);
        assert_eq!(manager.count(), 2);
    }

    #[tokio::test]
    async fn test_resubscribe_rekeys_and_delivers_data() {
        let manager = SubscriptionManager::new();
        let (callback, seen) = collector();
        let key = manager.register(store_entry("old-1", "all-users", callback));

        let report = manager
            .resubscribe_all(|request_type, payload| async move {
                assert_eq!(request_type, "store.subscribe");
                assert_eq!(payload, json!({"query": "all-users"}));
                Ok(json!({"subscriptionId": "new-1", "data": [{"name": "A"}]}))
            })
            .await;

        assert_eq!(report, ResubscribeReport { restored: 1, failed: 0 });
        assert_eq!(manager.ids(), vec!["new-1".to_string()]);
        assert_eq!(manager.current_id(key), Some("new-1".to_string()));
        assert_eq!(*seen.lock(), vec![json!([{"name": "A"}])]);

        manager.handle_push("old-1", json!("stale"));
        manager.handle_push("new-1", json!("fresh"));
        assert_eq!(seen.lock().last(), Some(&json!("fresh")));
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_resubscribe_with_swapped_ids_keeps_both() {
        let manager = SubscriptionManager::new();
        let (first, first_seen) = collector();
        let (second, second_seen) = collector();
        let a = manager.register(store_entry("sub-1", "a", first));
        let b = manager.register(store_entry("sub-2", "b", second));

        // Each entry comes back under the other's old ID
        let report = manager
            .resubscribe_all(|_, payload| async move {
                let id = if payload["query"] == "a" { "sub-2" } else { "sub-1" };
                Ok(json!({"subscriptionId": id, "data": payload["query"]}))
            })
            .await;

        assert_eq!(report, ResubscribeReport { restored: 2, failed: 0 });
        assert_eq!(manager.count(), 2);
        assert_eq!(manager.current_id(a), Some("sub-2".to_string()));
        assert_eq!(manager.current_id(b), Some("sub-1".to_string()));

        manager.handle_push("sub-2", json!("to-a"));
        manager.handle_push("sub-1", json!("to-b"));
        assert_eq!(*first_seen.lock(), vec![json!("a"), json!("to-a")]);
        assert_eq!(*second_seen.lock(), vec![json!("b"), json!("to-b")]);
    }

    #[tokio::test]
    async fn test_resubscribe_after_server_restart_numbering() {
        // A restarted server hands out sub-1, sub-2, ... again, in call order
        for _ in 0..20 {
            let manager = SubscriptionManager::new();
            manager.register(store_entry("sub-1", "a", |_| {}));
            manager.register(store_entry("sub-2", "b", |_| {}));
            manager.register(store_entry("sub-3", "c", |_| {}));

            let counter = AtomicU64::new(0);
            let report = manager
                .resubscribe_all(|_, _| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Ok(json!({"subscriptionId": format!("sub-{}", n)})) }
                })
                .await;

            assert_eq!(report, ResubscribeReport { restored: 3, failed: 0 });
            let mut ids = manager.ids();
            ids.sort();
            assert_eq!(ids, vec!["sub-1", "sub-2", "sub-3"]);
        }
    }

    #[tokio::test]
    async fn test_entries_stay_counted_while_restoring() {
        let manager = Arc::new(SubscriptionManager::new());
        let (callback, seen) = collector();
        let key = manager.register(store_entry("old", "q", callback));

        let inner = manager.clone();
        manager
            .resubscribe_all(move |_, _| {
                assert_eq!(inner.count(), 1);
                assert_eq!(inner.current_id(key), Some("old".to_string()));
                // Stale ID no longer routes while the new one is pending
                inner.handle_push("old", json!("stale"));
                async { Ok(json!({"subscriptionId": "new"})) }
            })
            .await;

        assert!(seen.lock().is_empty());
        assert_eq!(manager.current_id(key), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_resubscribe_without_data_delivers_nothing() {
        let manager = SubscriptionManager::new();
        let (callback, seen) = collector();
        manager.register(store_entry("old", "q", callback));

        manager
            .resubscribe_all(|_, _| async { Ok(json!({"subscriptionId": "new"})) })
            .await;

        assert!(seen.lock().is_empty());
        assert_eq!(manager.ids(), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_resubscribe_failure_drops_only_that_entry() {
        let manager = SubscriptionManager::new();
        manager.register(store_entry("ok-old", "good", |_| {}));
        manager.register(store_entry("bad-old", "broken", |_| {}));

        let report = manager
            .resubscribe_all(|_, payload| async move {
                if payload["query"] == "broken" {
                    Err(Error::Server(noex_core::ServerErrorData::new(
                        "QUERY_NOT_DEFINED",
                        "unknown query",
                    )))
                } else {
                    Ok(json!({"subscriptionId": "ok-new", "data": []}))
                }
            })
            .await;

        assert_eq!(report, ResubscribeReport { restored: 1, failed: 1 });
        assert_eq!(manager.ids(), vec!["ok-new".to_string()]);
    }

    #[tokio::test]
    async fn test_reply_without_subscription_id_drops_entry() {
        let manager = SubscriptionManager::new();
        manager.register(store_entry("old", "q", |_| {}));

        let report = manager.resubscribe_all(|_, _| async { Ok(json!({"data": []})) }).await;

        assert_eq!(report.failed, 1);
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_during_resubscribe_stays_gone() {
        let manager = Arc::new(SubscriptionManager::new());
        let key = manager.register(store_entry("old", "q", |_| {}));

        let inner = manager.clone();
        let report = manager
            .resubscribe_all(move |_, _| {
                inner.unregister_key(key);
                async { Ok(json!({"subscriptionId": "new"})) }
            })
            .await;

        assert_eq!(report.restored, 0);
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let manager = SubscriptionManager::new();
        manager.register(store_entry("a", "q", |_| {}));
        manager.register(store_entry("b", "q", |_| {}));

        manager.clear();
        assert_eq!(manager.count(), 0);

        let report = manager.resubscribe_all(|_, _| async { Ok(json!({})) }).await;
        assert_eq!(report, ResubscribeReport::default());
    }
}
