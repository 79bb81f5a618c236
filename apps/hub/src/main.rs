use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use broker::config::{self, SandboxDefaults};
use broker::{
    AgentRegistry, AgentSummary, BrokerConfig, BrokerError, Collection, Dispatcher,
    ExecutionReport, GatewayFactory, Intent, Registration,
};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::Config;
use opentelemetry_sdk::Resource;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{dispatcher, error, info, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::prelude::*;

const ENDPOINTS: [&str; 8] = [
    "GET /",
    "GET /health",
    "GET /metrics",
    "GET /agents",
    "POST /register",
    "DELETE /agents/{id}",
    "POST /post_intent",
    "POST /execute",
];

struct HubSettings {
    bind_addr: SocketAddr,
    propose_timeout: Duration,
    execute_timeout: Duration,
    default_sla_ms: u64,
    agents_config: Option<PathBuf>,
}

impl HubSettings {
    fn from_env() -> anyhow::Result<Self> {
        let bind_addr = std::env::var("HUB_BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
            .parse()?;
        Ok(Self {
            bind_addr,
            propose_timeout: Duration::from_millis(env_u64("HUB_PROPOSE_TIMEOUT_MS", 2_500)),
            execute_timeout: Duration::from_millis(env_u64("HUB_EXECUTE_TIMEOUT_MS", 30_000)),
            default_sla_ms: env_u64("HUB_DEFAULT_SLA_MS", 120_000),
            agents_config: std::env::var(config::AGENTS_CONFIG_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

struct HubMetrics {
    registry: Registry,
    requests: IntCounterVec,
    request_duration: HistogramVec,
    proposals: IntCounterVec,
    winners: IntCounterVec,
}

impl HubMetrics {
    fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new("hub_requests_total", "HTTP requests handled by endpoint and status"),
            &["endpoint", "status"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "hub_request_duration_seconds",
                "Latency of HTTP requests in seconds",
            ),
            &["endpoint"],
        )?;
        let proposals = IntCounterVec::new(
            Opts::new(
                "hub_proposals_total",
                "Proposal solicitations by outcome (collected or failed)",
            ),
            &["outcome"],
        )?;
        let winners = IntCounterVec::new(
            Opts::new("hub_execution_winners_total", "Successful executions by agent"),
            &["agent"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(proposals.clone()))?;
        registry.register(Box::new(winners.clone()))?;
        Ok(Self {
            registry,
            requests,
            request_duration,
            proposals,
            winners,
        })
    }

    fn record_request(&self, endpoint: &str, status: StatusCode, duration: Duration) {
        self.requests
            .with_label_values(&[endpoint, status.as_str()])
            .inc();
        self.request_duration
            .with_label_values(&[endpoint])
            .observe(duration.as_secs_f64());
    }

    fn record_collection(&self, collection: &Collection) {
        self.proposals
            .with_label_values(&["collected"])
            .inc_by(collection.proposals.len() as u64);
        self.proposals
            .with_label_values(&["failed"])
            .inc_by(collection.failures.len() as u64);
    }

    fn record_winner(&self, agent: &str) {
        self.winners.with_label_values(&[agent]).inc();
    }

    fn render(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Clone)]
struct AppState {
    dispatcher: Dispatcher,
    metrics: Arc<HubMetrics>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let settings = HubSettings::from_env()?;
    let dispatcher = build_dispatcher(&settings)?;
    let metrics = Arc::new(HubMetrics::new()?);
    let agents = dispatcher.registry().len();

    let app = build_router(AppState {
        dispatcher,
        metrics,
    });

    let listener = TcpListener::bind(settings.bind_addr).await?;
    info!(bind_addr = %settings.bind_addr, agents, "hub listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    opentelemetry::global::shutdown_tracer_provider();
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    if dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339());
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT")
        .or_else(|_| std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT"))
        .ok();

    if let Some(endpoint) = otlp_endpoint {
        let resource = Resource::new(vec![
            KeyValue::new("service.name", "agent-hub"),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]);
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_trace_config(Config::default().with_resource(resource))
            .with_exporter(exporter)
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        registry.with(OpenTelemetryLayer::new(tracer)).try_init()?;
    } else {
        registry.try_init()?;
    }

    Ok(())
}

fn build_dispatcher(settings: &HubSettings) -> anyhow::Result<Dispatcher> {
    let factory = GatewayFactory::new(settings.propose_timeout.max(settings.execute_timeout))?;
    let descriptors =
        config::load_descriptors(settings.agents_config.as_deref(), &SandboxDefaults::from_env())?;
    let registry = AgentRegistry::with_descriptors(factory, descriptors)?;
    let config = BrokerConfig::new()
        .with_propose_timeout(settings.propose_timeout)
        .with_execute_timeout(settings.execute_timeout)
        .with_default_sla_ms(settings.default_sla_ms);
    Ok(Dispatcher::new(config, Arc::new(registry)))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/agents", get(list_agents))
        .route("/agents/:id", delete(remove_agent))
        .route("/register", post(register_agent))
        .route("/post_intent", post(post_intent))
        .route("/execute", post(execute_intent))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}

async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();
    let response = next.run(request).await;
    state
        .metrics
        .record_request(&endpoint, response.status(), start.elapsed());
    response
}

async fn service_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "agent-hub",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ENDPOINTS,
        "agents": state.dispatcher.registry().summaries(),
    }))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            error!(?err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode metrics",
            )
                .into_response()
        }
    }
}

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentSummary>> {
    Json(state.dispatcher.registry().summaries())
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
}

async fn register_agent(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<Registration>, HubError> {
    let registration = state
        .dispatcher
        .registry()
        .register(&payload.name, &payload.url)?;
    Ok(Json(registration))
}

async fn remove_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, HubError> {
    if state.dispatcher.registry().remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(BrokerError::AgentUnavailable(id).into())
    }
}

async fn post_intent(
    State(state): State<AppState>,
    Json(intent): Json<Intent>,
) -> Result<Json<Value>, HubError> {
    let collection = state.dispatcher.collect(&intent).await?;
    state.metrics.record_collection(&collection);
    Ok(Json(json!({
        "proposals": collection.proposals,
        "failures": collection.failures,
    })))
}

async fn execute_intent(
    State(state): State<AppState>,
    Json(intent): Json<Intent>,
) -> Result<Json<ExecutionReport>, HubError> {
    let report = state.dispatcher.execute(&intent).await?;
    state.metrics.record_winner(&report.winner);
    Ok(Json(report))
}

#[derive(Debug, Error)]
enum HubError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BrokerError> for HubError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::InvalidIntent(_) | BrokerError::InvalidOperation(_) => {
                HubError::BadRequest(err.to_string())
            }
            BrokerError::AgentUnavailable(_) => HubError::NotFound(err.to_string()),
            BrokerError::NoEligibleProvider | BrokerError::AllProvidersFailed(_) => {
                HubError::Unavailable(err.to_string())
            }
            other => HubError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            HubError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            HubError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            HubError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "detail": msg }))
            }
            HubError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
        };
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(kind = ?self, "request failed");
        } else {
            warn!(kind = ?self, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}
