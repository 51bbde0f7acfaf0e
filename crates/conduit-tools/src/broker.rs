//! Tool-execution broker client
//!
//! The broker is the external service that owns third-party OAuth accounts
//! and exposes tool descriptors + execution for them. This client implements
//! exactly the five operations the core depends on (spec §6: Broker interface).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

const TOOLS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("broker API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("request timed out")]
    Timeout,
}

/// Account bound to a single (userId/entityId, appName) connection attempt
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectedAccount {
    pub id: String,
    pub status: String,
    pub redirect_url: Option<String>,
}

/// A concrete, callable tool descriptor fetched for a specific entity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub app_name: String,
    pub description: String,
    pub parameters: Value,
}

/// Result of executing a single tool call via the broker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecuteResult {
    pub successful: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Filter for `getTools`: by app name or by explicit action (tool) name
#[derive(Debug, Clone)]
pub enum ToolFilter {
    Apps(Vec<String>),
    Actions(Vec<String>),
}

#[derive(Clone)]
pub struct BrokerClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl BrokerClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Result<Self, BrokerError> {
        let client = reqwest::Client::builder()
            .user_agent("conduit/0.1.0")
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Start (or resume) an OAuth-style handshake for `appName` on behalf of `entityId`
    pub async fn initiate(
        &self,
        app_name: &str,
        entity_id: &str,
    ) -> Result<ConnectedAccount, BrokerError> {
        let url = format!("{}/connections/initiate", self.api_base);
        let req = self
            .client
            .post(&url)
            .timeout(STATUS_TIMEOUT)
            .json(&serde_json::json!({ "appName": app_name, "entityId": entity_id }));

        let resp = self.auth(req).send().await.map_err(to_timeout_aware)?;
        parse_response(resp).await
    }

    /// Fetch the current status of a connected account
    pub async fn get(&self, connected_account_id: &str) -> Result<ConnectedAccount, BrokerError> {
        let url = format!(
            "{}/connections/{}",
            self.api_base, connected_account_id
        );
        let req = self.client.get(&url).timeout(STATUS_TIMEOUT);
        let resp = self.auth(req).send().await.map_err(to_timeout_aware)?;
        parse_response(resp).await
    }

    /// Re-initiate a previously failed/expired connection
    pub async fn reinitiate(
        &self,
        connected_account_id: &str,
        redirect_uri: &str,
    ) -> Result<ConnectedAccount, BrokerError> {
        let url = format!(
            "{}/connections/{}/reinitiate",
            self.api_base, connected_account_id
        );
        let req = self
            .client
            .post(&url)
            .timeout(STATUS_TIMEOUT)
            .json(&serde_json::json!({ "redirectUri": redirect_uri }));

        let resp = self.auth(req).send().await.map_err(to_timeout_aware)?;
        parse_response(resp).await
    }

    /// Fetch concrete tool descriptors matching a filter, scoped to an entity
    pub async fn get_tools(
        &self,
        filter: ToolFilter,
        entity_id: &str,
    ) -> Result<Vec<ToolDescriptor>, BrokerError> {
        let url = format!("{}/tools", self.api_base);
        let body = match filter {
            ToolFilter::Apps(apps) => serde_json::json!({ "apps": apps, "entityId": entity_id }),
            ToolFilter::Actions(actions) => {
                serde_json::json!({ "actions": actions, "entityId": entity_id })
            }
        };

        let req = self
            .client
            .post(&url)
            .timeout(TOOLS_FETCH_TIMEOUT)
            .json(&body);

        let resp = self.auth(req).send().await.map_err(to_timeout_aware)?;
        parse_response(resp).await
    }

    /// Execute a single tool call through the broker
    pub async fn execute(
        &self,
        action: &str,
        params: &Value,
        connected_account_id: &str,
        entity_id: &str,
    ) -> Result<ExecuteResult, BrokerError> {
        let url = format!("{}/execute", self.api_base);
        let req = self
            .client
            .post(&url)
            .timeout(EXECUTE_TIMEOUT)
            .json(&serde_json::json!({
                "action": action,
                "params": params,
                "connectedAccountId": connected_account_id,
                "entityId": entity_id,
            }));

        let resp = self.auth(req).send().await.map_err(to_timeout_aware)?;
        parse_response(resp).await
    }
}

fn to_timeout_aware(e: reqwest::Error) -> BrokerError {
    if e.is_timeout() {
        BrokerError::Timeout
    } else {
        BrokerError::Request(e)
    }
}

async fn parse_response<T: for<'de> Deserialize<'de>>(
    resp: reqwest::Response,
) -> Result<T, BrokerError> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        warn!("broker returned {}: {}", status, message);
        return Err(BrokerError::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(resp.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_result_defaults_data_and_error_to_none() {
        let v: ExecuteResult = serde_json::from_str(r#"{"successful": true}"#).unwrap();
        assert!(v.successful);
        assert!(v.data.is_none());
        assert!(v.error.is_none());
    }

    #[test]
    fn execute_result_carries_error_field() {
        let v: ExecuteResult =
            serde_json::from_str(r#"{"successful": false, "error": "rate limited"}"#).unwrap();
        assert!(!v.successful);
        assert_eq!(v.error.as_deref(), Some("rate limited"));
    }
}
