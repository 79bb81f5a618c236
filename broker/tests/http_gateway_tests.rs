use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use broker::gateway::{AgentGateway, GatewayFactory, HttpAgent, Transport};
use broker::model::{Intent, ResultStatus, Task};
use broker::BrokerError;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

fn sample_intent() -> Intent {
    let mut inputs = Map::new();
    inputs.insert("text".to_string(), json!("Team sync Friday 3pm"));
    Intent::new("extract_event", inputs).with_budget(0.05)
}

#[tokio::test]
async fn proposes_and_executes_over_http() {
    let app = Router::new()
        .route(
            "/intent",
            post(|Json(intent): Json<Value>| async move {
                assert_eq!(intent["goal"], "extract_event");
                assert_eq!(intent["budget"]["max_usd"], 0.05);
                Json(json!({
                    "est_cost_usd": 0.01,
                    "est_latency_ms": 500,
                    "confidence": 0.75,
                    "plan": ["ocr", "regex"],
                    "needs": {}
                }))
            }),
        )
        .route(
            "/a2a",
            post(|Json(task): Json<Value>| async move {
                Json(json!({
                    "status": "OK",
                    "data": { "title": "Team sync", "echo": task["inputs"]["text"] },
                    "metrics": { "latency_ms": 420, "cost_usd": 0.009 },
                    "evidence": { "artifacts": [], "root": "abc" }
                }))
            }),
        )
        .fallback(|| async { StatusCode::NOT_FOUND });
    let addr = serve(app).await;

    let agent = HttpAgent::new(client(), format!("http://{addr}/"));
    let intent = sample_intent();
    let proposal = agent.propose(&intent).await.unwrap();
    assert_eq!(proposal.est_latency_ms, 500);
    assert_eq!(proposal.plan, vec!["ocr".to_string(), "regex".to_string()]);

    let task = Task::from_intent(&intent, 120_000);
    let result = agent.execute(&task).await.unwrap();
    assert_eq!(result.status, ResultStatus::Ok);
    assert_eq!(result.data["echo"], "Team sync Friday 3pm");
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let app = Router::new().route(
        "/intent",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
    );
    let addr = serve(app).await;

    let agent = HttpAgent::new(client(), format!("http://{addr}"));
    let err = agent.propose(&sample_intent()).await.unwrap_err();
    match err {
        BrokerError::Status { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn undecodable_body_is_malformed() {
    let app = Router::new().route("/intent", post(|| async { Json(json!({ "price": "cheap" })) }));
    let addr = serve(app).await;

    let agent = HttpAgent::new(client(), format!("http://{addr}"));
    let err = agent.propose(&sample_intent()).await.unwrap_err();
    assert!(matches!(err, BrokerError::MalformedResponse(_)));
}

#[tokio::test]
async fn unreachable_agent_is_a_network_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gateway = GatewayFactory::new(Duration::from_secs(1))
        .unwrap()
        .build(&Transport::http(format!("http://{addr}")));
    assert_eq!(gateway.kind(), "http");
    let err = gateway.propose(&sample_intent()).await.unwrap_err();
    assert!(matches!(err, BrokerError::Network(_)));
}
