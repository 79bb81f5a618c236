use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid intent: {0}")]
    InvalidIntent(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("agent '{0}' is not registered")]
    AgentUnavailable(String),
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),
    #[error("network request failed: {0}")]
    Network(String),
    #[error("agent returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed agent response: {0}")]
    MalformedResponse(String),
    #[error("agent execution failed: {0}")]
    AgentFailed(String),
    #[error("no eligible provider")]
    NoEligibleProvider,
    #[error("all providers failed: {0}")]
    AllProvidersFailed(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl BrokerError {
    /// Whether the failure originates from caller input rather than from an agent.
    pub fn is_input_error(&self) -> bool {
        matches!(self, BrokerError::InvalidIntent(_))
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
