//! Brokering of intents across competing worker agents.
//!
//! Agents are asked for proposals concurrently, the proposals are filtered
//! against the intent's hard constraints, scored and ranked, and the task is
//! executed on the best agent with fallback down the ranking.

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod explain;
pub mod filter;
pub mod gateway;
pub mod model;
pub mod ranker;
pub mod registry;
pub mod scorer;

pub use dispatcher::{AgentFailure, BrokerConfig, Collection, Dispatcher, ExecutionReport};
pub use errors::{BrokerError, Result};
pub use explain::Explanation;
pub use gateway::{AgentGateway, GatewayFactory, Transport};
pub use model::{Intent, Proposal, ResultStatus, Task, TaskResult};
pub use registry::{AgentDescriptor, AgentRegistry, AgentSummary, Registration, RegistrationStatus};
pub use scorer::ScoredProposal;
