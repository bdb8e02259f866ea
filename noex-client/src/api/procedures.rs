//! `procedures.*` requests

use crate::NoexClient;
use noex_core::Result;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct ProceduresApi {
    client: NoexClient,
}

impl ProceduresApi {
    pub(crate) fn new(client: NoexClient) -> Self {
        Self { client }
    }

    pub async fn register(&self, procedure: Value) -> Result<Value> {
        self.client
            .request("procedures.register", json!({ "procedure": procedure }))
            .await
    }

    pub async fn unregister(&self, name: &str) -> Result<Value> {
        self.client
            .request("procedures.unregister", json!({ "name": name }))
            .await
    }

    pub async fn update(&self, name: &str, updates: Value) -> Result<Value> {
        self.client
            .request("procedures.update", json!({ "name": name, "updates": updates }))
            .await
    }

    pub async fn get(&self, name: &str) -> Result<Value> {
        self.client.request("procedures.get", json!({ "name": name })).await
    }

    pub async fn list(&self) -> Result<Value> {
        self.client.request("procedures.list", json!({})).await
    }

    /// Run a procedure; a missing input is sent as `{}`
    pub async fn call(&self, name: &str, input: Option<Value>) -> Result<Value> {
        let input = input.unwrap_or_else(|| json!({}));
        self.client
            .request("procedures.call", json!({ "name": name, "input": input }))
            .await
    }
}
