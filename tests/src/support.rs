use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use broker::{
    AgentDescriptor, AgentRegistry, BrokerConfig, Dispatcher, GatewayFactory, Proposal, Transport,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// How a fake agent answers `/a2a`.
#[derive(Debug, Clone, Copy)]
pub enum Execution {
    Succeed,
    Fail,
}

/// A loopback HTTP agent with canned answers.
#[derive(Debug, Clone)]
pub struct FakeAgent {
    pub id: String,
    pub proposal: Option<Proposal>,
    pub execution: Execution,
    pub executions: Arc<AtomicUsize>,
}

impl FakeAgent {
    pub fn new(id: &str, cost: f64, latency_ms: u64, confidence: f64) -> Self {
        Self {
            id: id.to_string(),
            proposal: Some(Proposal::new(cost, latency_ms, confidence)),
            execution: Execution::Succeed,
            executions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn without_proposal(mut self) -> Self {
        self.proposal = None;
        self
    }

    pub fn failing_execution(mut self) -> Self {
        self.execution = Execution::Fail;
        self
    }

    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

async fn propose(State(agent): State<FakeAgent>) -> Result<Json<Proposal>, StatusCode> {
    agent
        .proposal
        .clone()
        .map(Json)
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn execute(
    State(agent): State<FakeAgent>,
    Json(task): Json<Value>,
) -> (StatusCode, Json<Value>) {
    agent.executions.fetch_add(1, Ordering::SeqCst);
    match agent.execution {
        Execution::Succeed => (
            StatusCode::OK,
            Json(json!({
                "status": "OK",
                "data": { "handled_by": agent.id, "goal": task["goal"] },
                "metrics": { "latency_ms": 120 }
            })),
        ),
        Execution::Fail => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "worker crashed" })),
        ),
    }
}

/// Serves `agent` on an ephemeral loopback port and returns its base url.
pub async fn spawn_agent(agent: FakeAgent) -> Result<String> {
    let app = Router::new()
        .route("/intent", post(propose))
        .route("/a2a", post(execute))
        .with_state(agent);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

/// A loopback url nothing listens on.
pub fn unreachable_url() -> Result<String> {
    let listener = StdTcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

/// Spawns every agent and registers it under its id.
pub async fn dispatcher_for(agents: &[FakeAgent]) -> Result<Dispatcher> {
    let registry = AgentRegistry::new(GatewayFactory::new(Duration::from_secs(2))?);
    for agent in agents {
        let url = spawn_agent(agent.clone()).await?;
        registry.add_or_update(AgentDescriptor::new(
            agent.id.clone(),
            format!("Fake {}", agent.id),
            Transport::http(url),
        ))?;
    }
    let config = BrokerConfig::new()
        .with_propose_timeout(Duration::from_secs(1))
        .with_execute_timeout(Duration::from_secs(2));
    Ok(Dispatcher::new(config, Arc::new(registry)))
}

/// The three agents used throughout the ranking scenarios.
pub fn reference_agents() -> Vec<FakeAgent> {
    vec![
        FakeAgent::new("agent1", 0.01, 500, 0.75),
        FakeAgent::new("agent2", 0.05, 2_000, 0.90),
        FakeAgent::new("agent3", 0.005, 200, 0.60),
    ]
}
