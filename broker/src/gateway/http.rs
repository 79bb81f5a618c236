use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::AgentGateway;
use crate::errors::{BrokerError, Result};
use crate::model::{Intent, Proposal, Task, TaskResult};

/// Agent reached through a plain JSON-over-HTTP endpoint.
pub struct HttpAgent {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAgent {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl AgentGateway for HttpAgent {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn propose(&self, intent: &Intent) -> Result<Proposal> {
        let url = self.endpoint("intent");
        debug!(%url, "requesting proposal");
        let response = self
            .http
            .post(url)
            .json(intent)
            .send()
            .await
            .map_err(|err| BrokerError::Network(err.to_string()))?;
        decode_json(response).await
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult> {
        let url = self.endpoint("a2a");
        debug!(%url, "executing task");
        let response = self
            .http
            .post(url)
            .json(task)
            .send()
            .await
            .map_err(|err| BrokerError::Network(err.to_string()))?;
        decode_json(response).await
    }
}

pub(crate) async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unavailable>".to_string());
        return Err(BrokerError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|err| BrokerError::MalformedResponse(err.to_string()))
}
