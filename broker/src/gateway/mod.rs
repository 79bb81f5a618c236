//! Transport-independent access to worker agents.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::{BrokerError, Result};
use crate::model::{Intent, Proposal, Task, TaskResult};

pub mod http;
pub mod sandboxed;
pub mod tool;

pub use http::HttpAgent;
pub use sandboxed::SandboxedAgent;
pub use tool::ToolProtocolAgent;

pub const DEFAULT_PROPOSE_TOOL: &str = "propose";
pub const DEFAULT_EXECUTE_TOOL: &str = "execute";

/// The two operations every agent offers, whatever it is reached through.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn propose(&self, intent: &Intent) -> Result<Proposal>;

    async fn execute(&self, task: &Task) -> Result<TaskResult>;

    /// Proposal to use when a live `propose` cannot be obtained at all.
    fn fallback_proposal(&self) -> Option<Proposal> {
        None
    }
}

fn default_propose_tool() -> String {
    DEFAULT_PROPOSE_TOOL.to_string()
}

fn default_execute_tool() -> String {
    DEFAULT_EXECUTE_TOOL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transport {
    Http {
        url: String,
    },
    ToolProtocol {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default = "default_propose_tool")]
        propose_tool: String,
        #[serde(default = "default_execute_tool")]
        execute_tool: String,
    },
    Sandboxed {
        base_url: String,
        #[serde(default, skip_serializing)]
        api_key: Option<String>,
        #[serde(default)]
        manifest: Value,
    },
}

impl Transport {
    pub fn http(url: impl Into<String>) -> Self {
        Transport::Http { url: url.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Http { .. } => "http",
            Transport::ToolProtocol { .. } => "tool_protocol",
            Transport::Sandboxed { .. } => "sandboxed",
        }
    }

    pub fn address(&self) -> &str {
        match self {
            Transport::Http { url } => url,
            Transport::ToolProtocol { command, .. } => command,
            Transport::Sandboxed { base_url, .. } => base_url,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Transport::Http { url } => {
                let url = url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(BrokerError::InvalidOperation(format!(
                        "agent url '{url}' must use http or https"
                    )));
                }
            }
            Transport::ToolProtocol { command, .. } => {
                if command.trim().is_empty() {
                    return Err(BrokerError::InvalidOperation(
                        "tool protocol command must not be empty".to_string(),
                    ));
                }
            }
            Transport::Sandboxed { base_url, .. } => {
                if base_url.trim().is_empty() {
                    return Err(BrokerError::InvalidOperation(
                        "sandbox base url must not be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Builds gateways from transport descriptors, sharing one HTTP connection pool.
#[derive(Clone)]
pub struct GatewayFactory {
    http: reqwest::Client,
}

impl GatewayFactory {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| BrokerError::InvalidOperation(err.to_string()))?;
        Ok(Self { http })
    }

    pub fn build(&self, transport: &Transport) -> Arc<dyn AgentGateway> {
        match transport {
            Transport::Http { url } => Arc::new(HttpAgent::new(self.http.clone(), url.clone())),
            Transport::ToolProtocol {
                command,
                args,
                env,
                propose_tool,
                execute_tool,
            } => Arc::new(
                ToolProtocolAgent::new(command.clone(), args.clone(), env.clone())
                    .with_tools(propose_tool.clone(), execute_tool.clone()),
            ),
            Transport::Sandboxed {
                base_url,
                api_key,
                manifest,
            } => Arc::new(SandboxedAgent::new(
                self.http.clone(),
                base_url.clone(),
                api_key.clone(),
                manifest.clone(),
            )),
        }
    }
}

/// Substitutes an agent's declared static proposal when its live one fails.
pub struct WithDefaults {
    agent_id: String,
    inner: Arc<dyn AgentGateway>,
    defaults: Proposal,
}

impl WithDefaults {
    pub fn wrap(
        agent_id: impl Into<String>,
        inner: Arc<dyn AgentGateway>,
        defaults: Option<Proposal>,
    ) -> Arc<dyn AgentGateway> {
        match defaults {
            Some(defaults) => Arc::new(Self {
                agent_id: agent_id.into(),
                inner,
                defaults,
            }),
            None => inner,
        }
    }
}

#[async_trait]
impl AgentGateway for WithDefaults {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    async fn propose(&self, intent: &Intent) -> Result<Proposal> {
        match self.inner.propose(intent).await {
            Ok(proposal) => Ok(proposal),
            Err(err) => {
                warn!(agent = %self.agent_id, error = %err, "live proposal failed, using declared defaults");
                Ok(self.defaults.clone())
            }
        }
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult> {
        self.inner.execute(task).await
    }

    fn fallback_proposal(&self) -> Option<Proposal> {
        Some(self.defaults.clone())
    }
}
