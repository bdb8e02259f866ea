//! `auth.*` requests

use crate::NoexClient;
use noex_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The authenticated session as reported by `auth.whoami`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WhoAmIReply {
    #[serde(default)]
    authenticated: bool,
    user_id: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    expires_at: Option<i64>,
}

impl WhoAmIReply {
    fn into_session(self) -> Option<SessionInfo> {
        Some(SessionInfo {
            user_id: self.user_id?,
            roles: self.roles,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AuthApi {
    client: NoexClient,
}

impl AuthApi {
    pub(crate) fn new(client: NoexClient) -> Self {
        Self { client }
    }

    pub async fn login(&self, token: &str) -> Result<Value> {
        self.client.request("auth.login", json!({ "token": token })).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.client.request("auth.logout", json!({})).await?;
        Ok(())
    }

    /// `None` when the connection is not authenticated
    pub async fn whoami(&self) -> Result<Option<SessionInfo>> {
        let result = self.client.request("auth.whoami", json!({})).await?;
        let reply: WhoAmIReply = serde_json::from_value(result)?;

        if !reply.authenticated {
            return Ok(None);
        }

        reply
            .into_session()
            .map(Some)
            .ok_or_else(|| Error::UnexpectedResponse("auth.whoami reply without userId".to_string()))
    }
}
