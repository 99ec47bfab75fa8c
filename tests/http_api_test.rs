//! HTTP surface over a fully wired relay.

mod common;

use agent_relay::adapters::agents::{MockAgentBackend, MockBehavior};
use agent_relay::adapters::http::RelayHttpServer;
use agent_relay::domain::models::ServerConfig;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{relay, test_config, TestRelay};
use serde_json::Value;
use tower::ServiceExt;

fn router(relay: &TestRelay) -> Router {
    RelayHttpServer::new(relay.dispatcher.clone(), ServerConfig::default()).router()
}

fn chat(body: &'static str, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(session) = session {
        builder = builder.header("x-session-id", session);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_open_breaker_maps_to_503() {
    let mut config = test_config();
    config.breaker.failure_threshold = 2;
    let relay = relay(&config, MockAgentBackend::with_behavior(MockBehavior::failure("down")));
    let app = router(&relay);

    for _ in 0..2 {
        let response = app.clone().oneshot(chat(r#"{"message":"hi"}"#, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    let response = app.clone().oneshot(chat(r#"{"message":"hi"}"#, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let payload = body_json(response).await;
    assert_eq!(payload["success"], false);
    assert_eq!(payload["error"], "SERVICE_UNAVAILABLE");
    assert_eq!(payload["path"], "/api/chat");
    assert!(payload["timestamp"].is_string());

    let health = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::SERVICE_UNAVAILABLE);
    let payload = body_json(health).await;
    assert_eq!(payload["status"], "down");
    assert_eq!(payload["components"]["circuitBreaker"]["state"], "open");
}

#[tokio::test]
async fn test_forget_session_starts_fresh_history() {
    let relay = relay(&test_config(), MockAgentBackend::new());
    let app = router(&relay);

    app.clone().oneshot(chat(r#"{"message":"one"}"#, Some("conv-1"))).await.unwrap();
    let response = app.clone().oneshot(chat(r#"{"message":"two"}"#, Some("conv-1"))).await.unwrap();
    assert_eq!(body_json(response).await["response"], "[chat] turn 2: two");

    let deleted = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/sessions/conv-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert!(relay.storage.stored("conv-1").await.is_none());

    let response = app.oneshot(chat(r#"{"message":"three"}"#, Some("conv-1"))).await.unwrap();
    assert_eq!(body_json(response).await["response"], "[chat] turn 1: three");
}

#[tokio::test]
async fn test_metrics_endpoint_reports_breaker_fields() {
    let relay = relay(&test_config(), MockAgentBackend::new());
    let app = router(&relay);

    app.clone().oneshot(chat(r#"{"message":"hi"}"#, None)).await.unwrap();
    app.clone().oneshot(chat(r#"{"message":""}"#, None)).await.unwrap();

    let response = app
        .oneshot(Request::builder().uri("/api/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let payload = body_json(response).await;
    assert_eq!(payload["requestCount"], 2);
    assert_eq!(payload["errorCount"], 1);
    assert_eq!(payload["errorRate"], 0.5);
    assert_eq!(payload["errorsByType"]["VALIDATION_ERROR"], 1);
    assert_eq!(payload["circuitBreaker"]["failureCount"], 0);
    assert_eq!(payload["circuitBreaker"]["failureThreshold"], 5);
    assert!(payload["circuitBreaker"]["timeUntilHalfOpen"].is_null());
    assert!(payload["p99"].as_f64().unwrap() >= payload["p50"].as_f64().unwrap());
}
