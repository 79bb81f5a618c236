//! Agent configuration file loading.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::{BrokerError, Result};
use crate::gateway::{Transport, DEFAULT_EXECUTE_TOOL, DEFAULT_PROPOSE_TOOL};
use crate::model::Proposal;
use crate::registry::AgentDescriptor;

pub const AGENTS_CONFIG_ENV: &str = "HUB_AGENTS_CONFIG";
pub const SANDBOX_API_ENV: &str = "SPOONOS_API";
pub const SANDBOX_API_KEY_ENV: &str = "SPOONOS_API_KEY";
pub const DEFAULT_SANDBOX_API: &str = "http://localhost:8080";

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/agents.json", ".cursor/mcp.json"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentsFile {
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
    #[serde(default)]
    pub sandboxes: Vec<SandboxEntry>,
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, ToolServerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub defaults: Option<Proposal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub manifest: Value,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub defaults: Option<Proposal>,
}

/// A stdio tool server. Kept loose since these files are often shared with editors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolServerEntry {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub defaults: Option<Proposal>,
    #[serde(default)]
    pub propose_tool: Option<String>,
    #[serde(default)]
    pub execute_tool: Option<String>,
}

/// Fallbacks for sandbox entries that omit their endpoint or key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxDefaults {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl SandboxDefaults {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var(SANDBOX_API_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SANDBOX_API.to_string()),
            api_key: std::env::var(SANDBOX_API_KEY_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

impl Default for SandboxDefaults {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SANDBOX_API.to_string(),
            api_key: None,
        }
    }
}

impl AgentsFile {
    pub fn parse(raw: &str, origin: &Path) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| {
            BrokerError::Config(format!("{}: {err}", origin.display()))
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| BrokerError::Config(format!("{}: {err}", path.display())))?;
        Self::parse(&raw, path)
    }

    pub fn into_descriptors(
        self,
        origin: &Path,
        sandbox: &SandboxDefaults,
    ) -> Result<Vec<AgentDescriptor>> {
        let mut descriptors = Vec::new();

        for provider in self.providers {
            let mut descriptor =
                AgentDescriptor::new(provider.id, provider.name, Transport::http(provider.url))
                    .with_capabilities(provider.capabilities);
            descriptor.defaults = provider.defaults;
            descriptors.push(descriptor);
        }

        for entry in self.sandboxes {
            let transport = Transport::Sandboxed {
                base_url: entry.base_url.unwrap_or_else(|| sandbox.base_url.clone()),
                api_key: entry.api_key.or_else(|| sandbox.api_key.clone()),
                manifest: entry.manifest,
            };
            let mut descriptor = AgentDescriptor::new(entry.id, entry.name, transport)
                .with_capabilities(entry.capabilities);
            descriptor.defaults = entry.defaults;
            descriptors.push(descriptor);
        }

        for (id, server) in self.mcp_servers {
            let command = server.command.ok_or_else(|| {
                BrokerError::Config(format!(
                    "{}: tool server '{id}' has no command",
                    origin.display()
                ))
            })?;
            let transport = Transport::ToolProtocol {
                command,
                args: server.args.iter().map(stringify).collect(),
                env: server
                    .env
                    .iter()
                    .map(|(key, value)| (key.clone(), stringify(value)))
                    .collect(),
                propose_tool: server
                    .propose_tool
                    .unwrap_or_else(|| DEFAULT_PROPOSE_TOOL.to_string()),
                execute_tool: server
                    .execute_tool
                    .unwrap_or_else(|| DEFAULT_EXECUTE_TOOL.to_string()),
            };
            let name = server.name.unwrap_or_else(|| id.clone());
            let mut descriptor =
                AgentDescriptor::new(id, name, transport).with_capabilities(server.capabilities);
            descriptor.defaults = server.defaults;
            descriptors.push(descriptor);
        }

        for descriptor in &descriptors {
            descriptor
                .validate()
                .map_err(|err| BrokerError::Config(format!("{}: {err}", origin.display())))?;
        }
        Ok(descriptors)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Files consulted for agent configuration, most specific first.
pub fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(path) = explicit {
        paths.push(path.to_path_buf());
    }
    paths.extend(DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from));
    paths
}

/// The three HTTP providers used when no configuration file is present.
pub fn default_descriptors() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor::new("A", "OCR+Regex A", Transport::http("http://localhost:7001")),
        AgentDescriptor::new("B", "OCR+LLM B", Transport::http("http://localhost:7002")),
        AgentDescriptor::new("C", "Template C", Transport::http("http://localhost:7003")),
    ]
}

/// Loads descriptors from the first existing candidate file, or the built-in set.
pub fn load_descriptors(
    explicit: Option<&Path>,
    sandbox: &SandboxDefaults,
) -> Result<Vec<AgentDescriptor>> {
    for path in candidate_paths(explicit) {
        if !path.is_file() {
            continue;
        }
        let descriptors = AgentsFile::load(&path)?.into_descriptors(&path, sandbox)?;
        info!(path = %path.display(), agents = descriptors.len(), "agent configuration loaded");
        return Ok(descriptors);
    }
    if let Some(path) = explicit {
        warn!(path = %path.display(), "configured agent file not found");
    }
    info!("no agent configuration found, using built-in providers");
    Ok(default_descriptors())
}
