use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::errors::{BrokerError, Result};
use crate::explain::Explanation;
use crate::model::{Intent, Proposal, Task, TaskResult, DEFAULT_SLA_MS};
use crate::ranker;
use crate::registry::{goal_is_mapped, AgentRegistry, RegisteredAgent};
use crate::scorer::ScoredProposal;

const DEFAULT_PROPOSE_TIMEOUT: Duration = Duration::from_millis(2_500);
const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub propose_timeout: Duration,
    pub execute_timeout: Duration,
    pub default_sla_ms: u64,
}

impl BrokerConfig {
    pub fn new() -> Self {
        Self {
            propose_timeout: DEFAULT_PROPOSE_TIMEOUT,
            execute_timeout: DEFAULT_EXECUTE_TIMEOUT,
            default_sla_ms: DEFAULT_SLA_MS,
        }
    }

    pub fn with_propose_timeout(mut self, timeout: Duration) -> Self {
        self.propose_timeout = timeout;
        self
    }

    pub fn with_execute_timeout(mut self, timeout: Duration) -> Self {
        self.execute_timeout = timeout;
        self
    }

    pub fn with_default_sla_ms(mut self, sla_ms: u64) -> Self {
        self.default_sla_ms = sla_ms.max(1);
        self
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentFailure {
    pub agent_id: String,
    pub reason: String,
}

/// Ranked proposals for one intent plus the agents that failed to bid.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub proposals: Vec<ScoredProposal>,
    pub failures: Vec<AgentFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub winner: String,
    pub winner_name: String,
    pub proposal: Proposal,
    pub result: TaskResult,
    pub explanation: Explanation,
}

/// Solicits proposals from registered agents and runs the winner, falling
/// back down the ranking when an agent fails.
#[derive(Clone)]
pub struct Dispatcher {
    config: BrokerConfig,
    registry: Arc<AgentRegistry>,
}

impl Dispatcher {
    pub fn new(config: BrokerConfig, registry: Arc<AgentRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Fans `propose` out to every registered agent, then filters, scores and ranks.
    /// Capability fit is applied by the filter so that incapable agents remain
    /// available as penalized fallbacks.
    #[instrument(skip(self, intent), fields(goal = %intent.goal))]
    pub async fn collect(&self, intent: &Intent) -> Result<Collection> {
        intent.validate()?;
        let agents = self.registry.snapshot();
        let goal_mapped = goal_is_mapped(&agents, &intent.goal);
        debug!(candidates = agents.len(), goal_mapped, "soliciting proposals");

        let outcomes = join_all(agents.iter().map(|agent| self.solicit(agent, intent))).await;

        let mut candidates = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (agent, outcome) in agents.iter().zip(outcomes) {
            match outcome {
                Ok(proposal) => candidates.push(agent.candidate(proposal)),
                Err(err) => {
                    warn!(agent = %agent.id(), error = %err, "no proposal from agent");
                    failures.push(AgentFailure {
                        agent_id: agent.id().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let proposals = ranker::evaluate(candidates, intent, goal_mapped);
        info!(
            ranked = proposals.len(),
            failed = failures.len(),
            "proposals ranked"
        );
        Ok(Collection {
            proposals,
            failures,
        })
    }

    async fn solicit(&self, agent: &RegisteredAgent, intent: &Intent) -> Result<Proposal> {
        let live = match timeout(self.config.propose_timeout, agent.gateway.propose(intent)).await {
            Ok(result) => result.and_then(|proposal| proposal.validate().map(|_| proposal)),
            Err(_) => Err(BrokerError::Timeout(self.config.propose_timeout)),
        };
        let proposal = match live {
            Ok(proposal) => proposal,
            Err(err) => {
                let defaults = agent.gateway.fallback_proposal().ok_or(err)?;
                debug!(agent = %agent.id(), "using declared default proposal");
                defaults.validate()?;
                defaults
            }
        };
        debug!(
            agent = %agent.id(),
            cost = proposal.est_cost_usd,
            latency_ms = proposal.est_latency_ms,
            confidence = proposal.confidence,
            "proposal received"
        );
        Ok(proposal)
    }

    /// Runs the task on the best-ranked agent, moving down the ranking on failure.
    /// Only one agent executes at a time.
    #[instrument(skip(self, intent), fields(goal = %intent.goal))]
    pub async fn execute(&self, intent: &Intent) -> Result<ExecutionReport> {
        let collection = self.collect(intent).await?;
        if collection.proposals.is_empty() {
            warn!("no eligible provider for intent");
            return Err(BrokerError::NoEligibleProvider);
        }

        let task = Task::from_intent(intent, self.config.default_sla_ms);
        let mut last_error: Option<String> = None;
        let mut failed_attempts = 0usize;

        for ranked in collection.proposals {
            let Some(agent) = self.registry.get(&ranked.agent_id) else {
                debug!(agent = %ranked.agent_id, "agent deregistered before execution");
                continue;
            };

            match self.attempt(&agent, &task).await {
                Ok(result) => {
                    info!(
                        winner = %agent.id(),
                        rank = ranked.explanation.rank,
                        failed_attempts,
                        "task executed"
                    );
                    let mut explanation = ranked.explanation;
                    if failed_attempts > 0 {
                        explanation.notes.push(format!(
                            "selected after {failed_attempts} higher-ranked provider(s) failed to execute"
                        ));
                    }
                    return Ok(ExecutionReport {
                        winner: agent.id().to_string(),
                        winner_name: agent.name().to_string(),
                        proposal: ranked.proposal,
                        result,
                        explanation,
                    });
                }
                Err(err) => {
                    warn!(agent = %agent.id(), error = %err, "execution failed, falling back");
                    failed_attempts += 1;
                    last_error = Some(format!("provider {} error: {err}", agent.id()));
                }
            }
        }

        Err(BrokerError::AllProvidersFailed(last_error.unwrap_or_else(|| {
            "no ranked provider is registered any more".to_string()
        })))
    }

    async fn attempt(&self, agent: &RegisteredAgent, task: &Task) -> Result<TaskResult> {
        let result = timeout(self.config.execute_timeout, agent.gateway.execute(task))
            .await
            .map_err(|_| BrokerError::Timeout(self.config.execute_timeout))??;
        if !result.is_success() {
            return Err(BrokerError::AgentFailed(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| "agent reported ERROR status".to_string()),
            ));
        }
        Ok(result)
    }
}
