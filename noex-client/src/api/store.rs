//! `store.*` requests and store query subscriptions

use super::SubscriptionHandle;
use crate::guard::call_guarded;
use crate::subscription::{ResubscribeInfo, SubscriptionEntry};
use crate::NoexClient;
use noex_core::{Error, Result};
use serde_json::{json, Map, Value};

/// Push channel of store query subscriptions
pub(crate) const STORE_CHANNEL: &str = "subscription";

#[derive(Debug, Clone)]
pub struct StoreApi {
    client: NoexClient,
}

impl StoreApi {
    pub(crate) fn new(client: NoexClient) -> Self {
        Self { client }
    }

    pub fn bucket(&self, name: impl Into<String>) -> BucketApi {
        BucketApi {
            client: self.client.clone(),
            name: name.into(),
        }
    }

    /// Subscribe to a named server query
    ///
    /// `callback` receives the initial result before this returns, then every
    /// pushed update. The subscription is restored automatically after a
    /// reconnect.
    pub async fn subscribe<F>(&self, query: &str, params: Option<Value>, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let mut payload = json!({ "query": query });
        if let Some(params) = params {
            payload["params"] = params;
        }

        let result = self.client.request("store.subscribe", payload.clone()).await?;
        let subscription_id = result
            .get("subscriptionId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::UnexpectedResponse("store.subscribe reply without subscriptionId".to_string()))?
            .to_string();

        let entry = SubscriptionEntry::new(
            subscription_id,
            STORE_CHANNEL,
            callback,
            ResubscribeInfo::new("store.subscribe", payload),
        );
        let callback = entry.callback.clone();
        let key = self.client.subscriptions().register(entry);

        if let Some(data) = result.get("data") {
            let data = data.clone();
            call_guarded(query, || callback(data));
        }

        Ok(SubscriptionHandle::new(self.client.clone(), key, "store.unsubscribe"))
    }

    /// End a subscription and wait for the server to acknowledge
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        handle.unsubscribe_await().await
    }
}

/// Requests scoped to one bucket
#[derive(Debug, Clone)]
pub struct BucketApi {
    client: NoexClient,
    name: String,
}

impl BucketApi {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("bucket".to_string(), Value::String(self.name.clone()));
        payload
    }

    async fn send(&self, request_type: &str, payload: Map<String, Value>) -> Result<Value> {
        self.client.request(request_type, Value::Object(payload)).await
    }

    async fn send_with_filter(&self, request_type: &str, mut payload: Map<String, Value>, filter: Option<Value>) -> Result<Value> {
        if let Some(filter) = filter {
            payload.insert("filter".to_string(), filter);
        }
        self.send(request_type, payload).await
    }

    async fn aggregate(&self, request_type: &str, field: &str, filter: Option<Value>) -> Result<Value> {
        let mut payload = self.payload();
        payload.insert("field".to_string(), Value::String(field.to_string()));
        self.send_with_filter(request_type, payload, filter).await
    }

    /// Insert a record; returns the stored record
    pub async fn insert(&self, data: Value) -> Result<Value> {
        let mut payload = self.payload();
        payload.insert("data".to_string(), data);
        self.send("store.insert", payload).await
    }

    /// `Value::Null` when the key does not exist
    pub async fn get(&self, key: impl Into<Value>) -> Result<Value> {
        let mut payload = self.payload();
        payload.insert("key".to_string(), key.into());
        self.send("store.get", payload).await
    }

    pub async fn update(&self, key: impl Into<Value>, data: Value) -> Result<Value> {
        let mut payload = self.payload();
        payload.insert("key".to_string(), key.into());
        payload.insert("data".to_string(), data);
        self.send("store.update", payload).await
    }

    pub async fn delete(&self, key: impl Into<Value>) -> Result<()> {
        let mut payload = self.payload();
        payload.insert("key".to_string(), key.into());
        self.send("store.delete", payload).await?;
        Ok(())
    }

    pub async fn all(&self) -> Result<Value> {
        self.send("store.all", self.payload()).await
    }

    /// Records matching `filter` (`store.where`)
    pub async fn where_(&self, filter: Value) -> Result<Value> {
        self.send_with_filter("store.where", self.payload(), Some(filter)).await
    }

    pub async fn find_one(&self, filter: Value) -> Result<Value> {
        self.send_with_filter("store.findOne", self.payload(), Some(filter)).await
    }

    pub async fn count(&self, filter: Option<Value>) -> Result<u64> {
        let result = self.send_with_filter("store.count", self.payload(), filter).await?;
        result
            .as_u64()
            .ok_or_else(|| Error::UnexpectedResponse(format!("store.count returned {}", result)))
    }

    pub async fn first(&self, n: u64) -> Result<Value> {
        let mut payload = self.payload();
        payload.insert("n".to_string(), n.into());
        self.send("store.first", payload).await
    }

    pub async fn last(&self, n: u64) -> Result<Value> {
        let mut payload = self.payload();
        payload.insert("n".to_string(), n.into());
        self.send("store.last", payload).await
    }

    /// Cursor pagination; `after` is the cursor of the previous page
    pub async fn paginate(&self, limit: u64, after: Option<Value>) -> Result<Value> {
        let mut payload = self.payload();
        payload.insert("limit".to_string(), limit.into());
        if let Some(after) = after {
            payload.insert("after".to_string(), after);
        }
        self.send("store.paginate", payload).await
    }

    pub async fn sum(&self, field: &str, filter: Option<Value>) -> Result<Value> {
        self.aggregate("store.sum", field, filter).await
    }

    pub async fn avg(&self, field: &str, filter: Option<Value>) -> Result<Value> {
        self.aggregate("store.avg", field, filter).await
    }

    /// `Value::Null` for an empty selection
    pub async fn min(&self, field: &str, filter: Option<Value>) -> Result<Value> {
        self.aggregate("store.min", field, filter).await
    }

    /// `Value::Null` for an empty selection
    pub async fn max(&self, field: &str, filter: Option<Value>) -> Result<Value> {
        self.aggregate("store.max", field, filter).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.send("store.clear", self.payload()).await?;
        Ok(())
    }
}
