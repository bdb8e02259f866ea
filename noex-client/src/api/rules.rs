//! `rules.*` requests and event subscriptions

use super::SubscriptionHandle;
use crate::subscription::{ResubscribeInfo, SubscriptionEntry};
use crate::NoexClient;
use noex_core::{Error, Result};
use serde_json::{json, Map, Value};

/// Push channel of rules event subscriptions
pub(crate) const EVENT_CHANNEL: &str = "event";

#[derive(Debug, Clone)]
pub struct RulesApi {
    client: NoexClient,
}

impl RulesApi {
    pub(crate) fn new(client: NoexClient) -> Self {
        Self { client }
    }

    /// Emit an event on `topic`
    ///
    /// `causation_id` is only sent together with a `correlation_id`.
    pub async fn emit(
        &self,
        topic: &str,
        data: Option<Value>,
        correlation_id: Option<&str>,
        causation_id: Option<&str>,
    ) -> Result<Value> {
        let mut payload = Map::new();
        payload.insert("topic".to_string(), Value::String(topic.to_string()));
        if let Some(data) = data {
            payload.insert("data".to_string(), data);
        }
        if let Some(correlation_id) = correlation_id {
            payload.insert("correlationId".to_string(), correlation_id.into());
            if let Some(causation_id) = causation_id {
                payload.insert("causationId".to_string(), causation_id.into());
            }
        }

        self.client.request("rules.emit", Value::Object(payload)).await
    }

    pub async fn set_fact(&self, key: &str, value: Value) -> Result<Value> {
        self.client
            .request("rules.setFact", json!({ "key": key, "value": value }))
            .await
    }

    /// `Value::Null` when the fact does not exist
    pub async fn get_fact(&self, key: &str) -> Result<Value> {
        self.client.request("rules.getFact", json!({ "key": key })).await
    }

    /// `true` when the fact existed
    pub async fn delete_fact(&self, key: &str) -> Result<bool> {
        let result = self.client.request("rules.deleteFact", json!({ "key": key })).await?;
        result
            .get("deleted")
            .and_then(Value::as_bool)
            .ok_or_else(|| Error::UnexpectedResponse("rules.deleteFact reply without deleted flag".to_string()))
    }

    /// Facts whose key matches a glob pattern
    pub async fn query_facts(&self, pattern: &str) -> Result<Value> {
        self.client
            .request("rules.queryFacts", json!({ "pattern": pattern }))
            .await
    }

    pub async fn get_all_facts(&self) -> Result<Value> {
        self.client.request("rules.getAllFacts", json!({})).await
    }

    /// Subscribe to events whose topic matches `pattern`
    ///
    /// `callback` receives `(event, topic)`. The subscription is restored
    /// automatically after a reconnect.
    pub async fn subscribe<F>(&self, pattern: &str, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Value, &str) + Send + Sync + 'static,
    {
        let payload = json!({ "pattern": pattern });
        let result = self.client.request("rules.subscribe", payload.clone()).await?;
        let subscription_id = result
            .get("subscriptionId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::UnexpectedResponse("rules.subscribe reply without subscriptionId".to_string()))?
            .to_string();

        let entry = SubscriptionEntry::new(
            subscription_id,
            EVENT_CHANNEL,
            move |data: Value| {
                let topic = data.get("topic").and_then(Value::as_str).unwrap_or_default();
                let event = data.get("event").cloned().unwrap_or(Value::Null);
                callback(event, topic);
            },
            ResubscribeInfo::new("rules.subscribe", payload),
        );
        let key = self.client.subscriptions().register(entry);

        Ok(SubscriptionHandle::new(self.client.clone(), key, "rules.unsubscribe"))
    }

    /// End a subscription and wait for the server to acknowledge
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        handle.unsubscribe_await().await
    }

    /// Register a rule definition
    pub async fn register_rule(&self, rule: Value) -> Result<Value> {
        self.client.request("rules.registerRule", json!({ "rule": rule })).await
    }

    pub async fn unregister_rule(&self, rule_id: &str) -> Result<Value> {
        self.client
            .request("rules.unregisterRule", json!({ "ruleId": rule_id }))
            .await
    }

    /// Apply a partial update to a registered rule
    pub async fn update_rule(&self, rule_id: &str, updates: Value) -> Result<Value> {
        self.client
            .request("rules.updateRule", json!({ "ruleId": rule_id, "updates": updates }))
            .await
    }

    pub async fn enable_rule(&self, rule_id: &str) -> Result<Value> {
        self.client.request("rules.enableRule", json!({ "ruleId": rule_id })).await
    }

    pub async fn disable_rule(&self, rule_id: &str) -> Result<Value> {
        self.client.request("rules.disableRule", json!({ "ruleId": rule_id })).await
    }

    pub async fn get_rule(&self, rule_id: &str) -> Result<Value> {
        self.client.request("rules.getRule", json!({ "ruleId": rule_id })).await
    }

    pub async fn get_rules(&self) -> Result<Value> {
        self.client.request("rules.getRules", json!({})).await
    }

    /// Check a rule definition without registering it
    pub async fn validate_rule(&self, rule: Value) -> Result<Value> {
        self.client.request("rules.validateRule", json!({ "rule": rule })).await
    }

    /// Rules engine statistics
    pub async fn stats(&self) -> Result<Value> {
        self.client.request("rules.stats", json!({})).await
    }
}
