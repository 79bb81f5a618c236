use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::{BrokerError, Result};
use crate::filter::Candidate;
use crate::gateway::{AgentGateway, GatewayFactory, Transport, WithDefaults};
use crate::model::Proposal;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    pub transport: Transport,
    /// Goals this agent declares itself capable of.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Static proposal used when a live one cannot be obtained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Proposal>,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, transport: Transport) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            transport,
            capabilities: Vec::new(),
            defaults: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_defaults(mut self, defaults: Proposal) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BrokerError::InvalidOperation(
                "agent id must not be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(BrokerError::InvalidOperation(format!(
                "agent '{}' name must not be empty",
                self.id
            )));
        }
        self.transport.validate()
    }
}

pub struct RegisteredAgent {
    pub descriptor: AgentDescriptor,
    pub gateway: Arc<dyn AgentGateway>,
    pub registered_at: DateTime<Utc>,
}

impl RegisteredAgent {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_capable_of(&self, goal: &str) -> bool {
        self.descriptor.capabilities.iter().any(|cap| cap == goal)
    }

    pub fn candidate(&self, proposal: Proposal) -> Candidate {
        Candidate::new(
            self.descriptor.id.clone(),
            self.descriptor.name.clone(),
            self.descriptor.capabilities.iter().cloned(),
            proposal,
        )
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            id: self.descriptor.id.clone(),
            name: self.descriptor.name.clone(),
            kind: self.gateway.kind(),
            address: self.descriptor.transport.address().to_string(),
            capabilities: self.descriptor.capabilities.clone(),
            has_defaults: self.descriptor.defaults.is_some(),
            registered_at: self.registered_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub kind: &'static str,
    pub address: String,
    pub capabilities: Vec<String>,
    pub has_defaults: bool,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Registered,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registration {
    pub status: RegistrationStatus,
    pub id: String,
}

fn normalize_address(address: &str) -> &str {
    address.trim().trim_end_matches('/')
}

fn generate_agent_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("agent-{}", &raw[..8])
}

/// Ordered set of known agents.
///
/// Entries are appended on first sight and replaced in place on update, so a
/// snapshot always reflects registration order. Writers take the lock briefly and
/// readers clone `Arc`s out of it.
pub struct AgentRegistry {
    factory: GatewayFactory,
    agents: RwLock<Vec<Arc<RegisteredAgent>>>,
}

impl AgentRegistry {
    pub fn new(factory: GatewayFactory) -> Self {
        Self {
            factory,
            agents: RwLock::new(Vec::new()),
        }
    }

    pub fn with_descriptors(
        factory: GatewayFactory,
        descriptors: impl IntoIterator<Item = AgentDescriptor>,
    ) -> Result<Self> {
        let registry = Self::new(factory);
        for descriptor in descriptors {
            registry.add_or_update(descriptor)?;
        }
        Ok(registry)
    }

    /// Inserts or replaces an agent by id, building its gateway from the transport.
    pub fn add_or_update(&self, descriptor: AgentDescriptor) -> Result<RegistrationStatus> {
        descriptor.validate()?;
        let gateway = self.factory.build(&descriptor.transport);
        Ok(self.insert(descriptor, gateway))
    }

    /// Inserts or replaces an agent by id with a caller-supplied gateway.
    pub fn add_or_update_with(
        &self,
        descriptor: AgentDescriptor,
        gateway: Arc<dyn AgentGateway>,
    ) -> Result<RegistrationStatus> {
        descriptor.validate()?;
        Ok(self.insert(descriptor, gateway))
    }

    fn insert(&self, descriptor: AgentDescriptor, gateway: Arc<dyn AgentGateway>) -> RegistrationStatus {
        let mut agents = self.agents.write();
        insert_locked(&mut agents, descriptor, gateway)
    }

    /// Registers an HTTP agent by address. Re-registering an address renames the
    /// existing entry instead of adding a second one. Lookup and insert happen
    /// under one write guard so concurrent registrations cannot both miss.
    pub fn register(&self, name: &str, address: &str) -> Result<Registration> {
        let name = name.trim();
        let address = normalize_address(address);
        if name.is_empty() || address.is_empty() {
            return Err(BrokerError::InvalidOperation(
                "name and url are required".to_string(),
            ));
        }
        let transport = Transport::http(address);
        transport.validate()?;
        let gateway = self.factory.build(&transport);

        let mut agents = self.agents.write();
        let existing = agents.iter().find_map(|agent| match &agent.descriptor.transport {
            Transport::Http { url } if normalize_address(url) == address => {
                Some(agent.descriptor.clone())
            }
            _ => None,
        });
        let descriptor = match existing {
            Some(mut descriptor) => {
                descriptor.name = name.to_string();
                descriptor
            }
            None => AgentDescriptor::new(generate_agent_id(), name, transport),
        };
        let id = descriptor.id.clone();
        let status = insert_locked(&mut agents, descriptor, gateway);
        Ok(Registration { status, id })
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut agents = self.agents.write();
        let before = agents.len();
        agents.retain(|agent| agent.id() != id);
        let removed = agents.len() != before;
        if removed {
            info!(agent = %id, "agent removed");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<RegisteredAgent>> {
        self.agents
            .read()
            .iter()
            .find(|agent| agent.id() == id)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<RegisteredAgent>> {
        self.agents.read().clone()
    }

    pub fn summaries(&self) -> Vec<AgentSummary> {
        self.agents.read().iter().map(|agent| agent.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

/// Whether any agent in `agents` declares `goal` as a capability.
pub fn goal_is_mapped(agents: &[Arc<RegisteredAgent>], goal: &str) -> bool {
    agents.iter().any(|agent| agent.is_capable_of(goal))
}

fn insert_locked(
    agents: &mut Vec<Arc<RegisteredAgent>>,
    descriptor: AgentDescriptor,
    gateway: Arc<dyn AgentGateway>,
) -> RegistrationStatus {
    let gateway = WithDefaults::wrap(descriptor.id.clone(), gateway, descriptor.defaults.clone());
    match agents.iter().position(|agent| agent.id() == descriptor.id) {
        Some(idx) => {
            let registered_at = agents[idx].registered_at;
            info!(agent = %descriptor.id, "agent updated");
            agents[idx] = Arc::new(RegisteredAgent {
                descriptor,
                gateway,
                registered_at,
            });
            RegistrationStatus::Updated
        }
        None => {
            info!(agent = %descriptor.id, kind = descriptor.transport.kind(), "agent registered");
            agents.push(Arc::new(RegisteredAgent {
                descriptor,
                gateway,
                registered_at: Utc::now(),
            }));
            RegistrationStatus::Registered
        }
    }
}
