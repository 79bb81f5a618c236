use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::info;

use super::http::decode_json;
use super::AgentGateway;
use crate::errors::{BrokerError, Result};
use crate::model::{Intent, Proposal, Task, TaskResult};

const PROPOSAL_ROUTE: &str = "/proposal";
const EXECUTE_ROUTE: &str = "/execute";

/// Agent running inside a remote sandbox, spawned on first use.
pub struct SandboxedAgent {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    manifest: Value,
    sandbox_id: OnceCell<String>,
}

impl SandboxedAgent {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        manifest: Value,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            manifest,
            sandbox_id: OnceCell::new(),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn spawn(&self) -> Result<String> {
        let url = format!("{}/v1/sandboxes", self.base_url);
        let response = self
            .authorize(self.http.post(url).json(&self.manifest))
            .send()
            .await
            .map_err(|err| BrokerError::Network(err.to_string()))?;
        let body: Value = decode_json(response).await?;
        let id = ["id", "sandboxId", "sandbox_id"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .ok_or_else(|| {
                BrokerError::MalformedResponse("sandbox spawn response carried no id".to_string())
            })?
            .to_string();
        info!(sandbox = %id, base_url = %self.base_url, "sandbox spawned");
        Ok(id)
    }

    async fn sandbox_id(&self) -> Result<&str> {
        self.sandbox_id
            .get_or_try_init(|| self.spawn())
            .await
            .map(String::as_str)
    }

    async fn call(&self, route: &str, input: Value) -> Result<Value> {
        let id = self.sandbox_id().await?;
        let url = format!("{}/v1/sandboxes/{id}/call", self.base_url);
        let response = self
            .authorize(
                self.http
                    .post(url)
                    .json(&json!({ "route": route, "input": input })),
            )
            .send()
            .await
            .map_err(|err| BrokerError::Network(err.to_string()))?;
        decode_json(response).await
    }
}

#[async_trait]
impl AgentGateway for SandboxedAgent {
    fn kind(&self) -> &'static str {
        "sandboxed"
    }

    async fn propose(&self, intent: &Intent) -> Result<Proposal> {
        let input =
            serde_json::to_value(intent).map_err(|err| BrokerError::InvalidOperation(err.to_string()))?;
        let output = self.call(PROPOSAL_ROUTE, input).await?;
        serde_json::from_value(output).map_err(|err| BrokerError::MalformedResponse(err.to_string()))
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult> {
        let output = self.call(EXECUTE_ROUTE, json!({ "intent": task })).await?;
        serde_json::from_value(output).map_err(|err| BrokerError::MalformedResponse(err.to_string()))
    }
}
