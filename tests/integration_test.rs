//! Integration tests for the orchestrator HTTP API.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use async_trait::async_trait;
use bot_orchestrator::{
    api::{build_router, AppState},
    core::{init_metrics, AppConfig, AppError, Result},
    services::{ExpiringStore, InMemoryStore},
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn test_state(config: AppConfig) -> Arc<AppState> {
    init_metrics();
    Arc::new(AppState::new(
        config,
        Arc::new(InMemoryStore::new()),
        reqwest::Client::new(),
    ))
}

fn test_config() -> AppConfig {
    AppConfig {
        rate_limit_per_minute: 0,
        health_check_interval_secs: 0,
        ..AppConfig::default()
    }
}

fn create_test_app() -> Router {
    build_router(test_state(test_config()))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn register_echo(app: &Router, name: &str) -> Value {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/services",
        Some(json!({"name": name, "endpoint": "echo://local"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_root_and_health() {
    let app = create_test_app();

    let (status, body) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["services"], 0);
}

#[tokio::test]
async fn test_register_echo_service() {
    let app = create_test_app();
    let body = register_echo(&app, "echo").await;

    assert_eq!(body["name"], "echo");
    assert_eq!(body["is_active"], true);
    assert_eq!(body["current_load"], 0);
    assert_eq!(body["success_rate"], 100.0);
    assert_eq!(body["average_response_time"], 0.0);
    assert_eq!(body["capabilities"], json!(["echo", "repeat", "mirror"]));
    assert_eq!(body["id"].as_str().unwrap().len(), 36);

    let (status, list) = send(&app, "GET", "/api/v1/services", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["name"], "echo");
}

#[tokio::test]
async fn test_explicit_capabilities_kept() {
    let app = create_test_app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/services",
        Some(json!({
            "name": "echo",
            "endpoint": "echo://local",
            "capabilities": ["smalltalk"],
            "description": "Echoes everything"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["capabilities"], json!(["smalltalk"]));
    assert_eq!(body["description"], "Echoes everything");
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let app = create_test_app();
    register_echo(&app, "echo").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/services",
        Some(json!({"name": "echo", "endpoint": "echo://other"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_invalid_endpoint_rejected() {
    let app = create_test_app();
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/services",
        Some(json!({"name": "bad", "endpoint": "ftp://files"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, list) = send(&app, "GET", "/api/v1/services", None).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_query_without_services_is_404() {
    let app = create_test_app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("No suitable service found for query"));
}

#[tokio::test]
async fn test_query_routed_to_echo() {
    let app = create_test_app();
    register_echo(&app, "echo").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "echo");
    assert_eq!(body["response"]["response"], "Echo: hello");

    let (status, metrics) = send(&app, "GET", "/api/v1/services/echo/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["total_requests"], 1);
    assert_eq!(metrics["current_load"], 0);
    assert_eq!(metrics["success_rate"], 100.0);
    assert!(metrics["average_response_time"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let app = create_test_app();
    register_echo(&app, "echo").await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unauthorized_model_is_403() {
    let config = AppConfig {
        model_authorization_enabled: true,
        authorized_models: vec!["gpt-3.5-turbo".to_string()],
        ..test_config()
    };
    let app = build_router(test_state(config));
    register_echo(&app, "echo").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "hi", "model": "gpt-4"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["type"], "authorization_error");

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "hi", "model": "gpt-3.5-turbo"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_deregister_service() {
    let app = create_test_app();
    register_echo(&app, "echo").await;

    let (status, body) = send(&app, "DELETE", "/api/v1/services/echo", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Service echo successfully deregistered");

    let (status, _) = send(&app, "DELETE", "/api/v1/services/echo", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/v1/services/echo/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deactivated_service_not_routed() {
    let app = create_test_app();
    register_echo(&app, "echo").await;

    let (status, body) = send(
        &app,
        "PUT",
        "/api/v1/services/echo/active",
        Some(json!({"is_active": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);

    let (_, list) = send(&app, "GET", "/api/v1/services", None).await;
    assert!(list.as_array().unwrap().is_empty());

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/v1/services/ghost/active",
        Some(json!({"is_active": true})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_conversation_recorded_for_query() {
    let app = create_test_app();
    register_echo(&app, "echo").await;

    for query in ["hello", "again"] {
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/services/query",
            Some(json!({"query": query, "conversation_id": "conv-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversation_id"], "conv-1");
    }

    let (status, conversation) = send(&app, "GET", "/api/v1/conversations/conv-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conversation["message_count"], 4);
    let messages = conversation["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "hello");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Echo: hello");
    assert_eq!(messages[1]["metadata"]["service"], "echo");
    assert_eq!(messages[3]["content"], "Echo: again");

    let (_, list) = send(&app, "GET", "/api/v1/conversations", None).await;
    assert_eq!(list["conversations"], json!(["conv-1"]));

    let (status, _) = send(&app, "DELETE", "/api/v1/conversations/conv-1", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/api/v1/conversations/conv-1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_conversation_history_is_bounded() {
    let config = AppConfig {
        max_conversation_history: 3,
        ..test_config()
    };
    let app = build_router(test_state(config));
    register_echo(&app, "echo").await;

    for i in 0..3 {
        send(
            &app,
            "POST",
            "/api/v1/services/query",
            Some(json!({"query": format!("q{}", i), "conversation_id": "short"})),
        )
        .await;
    }

    let (_, conversation) = send(&app, "GET", "/api/v1/conversations/short", None).await;
    let contents: Vec<&str> = conversation["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["Echo: q1", "q2", "Echo: q2"]);
}

#[tokio::test]
async fn test_unknown_conversation_is_404() {
    let app = create_test_app();
    let (status, _) = send(&app, "GET", "/api/v1/conversations/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "DELETE", "/api/v1/conversations/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_query_rate_limited_per_client() {
    let config = AppConfig {
        rate_limit_per_minute: 1,
        ..test_config()
    };
    let app = build_router(test_state(config));
    register_echo(&app, "echo").await;

    let query = |client: &'static str| {
        Request::builder()
            .method("POST")
            .uri("/api/v1/services/query")
            .header("content-type", "application/json")
            .header("x-client-id", client)
            .body(Body::from(json!({"query": "hi"}).to_string()))
            .unwrap()
    };

    let first = app.clone().oneshot(query("alice")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = app.clone().oneshot(query("alice")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let other = app.clone().oneshot(query("bob")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);

    // management endpoints are not limited
    let (status, _) = send(&app, "GET", "/api/v1/services", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_echoed() {
    let app = create_test_app();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "trace-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "trace-42");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = create_test_app();
    register_echo(&app, "echo").await;
    send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "hello"})),
    )
    .await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("orchestrator_dispatch_total"));
    assert!(text.contains("orchestrator_http_requests_total"));
}

/// Conversation backend that fails every call, as if the server were down.
struct UnreachableStore;

#[async_trait]
impl ExpiringStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(AppError::StoreUnavailable("connection refused".to_string()))
    }

    async fn set_with_ttl(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
        Err(AppError::StoreUnavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(AppError::StoreUnavailable("connection refused".to_string()))
    }

    async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
        Err(AppError::StoreUnavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_conversation_store_outage_is_503() {
    init_metrics();
    let state = Arc::new(AppState::new(
        test_config(),
        Arc::new(UnreachableStore),
        reqwest::Client::new(),
    ));
    let app = build_router(state);
    register_echo(&app, "echo").await;

    let (status, body) = send(&app, "GET", "/api/v1/conversations/conv-1", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["type"], "store_error");

    let (status, _) = send(&app, "DELETE", "/api/v1/conversations/conv-1", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    // queries still succeed without history
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "hi", "conversation_id": "conv-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rejected_queries_leave_conversation_untouched() {
    let config = AppConfig {
        model_authorization_enabled: true,
        authorized_models: vec!["gpt-3.5-turbo".to_string()],
        ..test_config()
    };
    let app = build_router(test_state(config));

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "nobody home", "conversation_id": "conv-x"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    register_echo(&app, "echo").await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "hi", "model": "gpt-4", "conversation_id": "conv-x"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "GET", "/api/v1/conversations/conv-x", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, list) = send(&app, "GET", "/api/v1/conversations", None).await;
    assert_eq!(list["conversations"], json!([]));
}

#[tokio::test]
async fn test_conversation_history_reaches_backend() {
    let app = create_test_app();
    register_echo(&app, "echo").await;

    let (_, first) = send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "one", "conversation_id": "conv-h"})),
    )
    .await;
    assert_eq!(first["response"]["history_length"], 0);

    let (_, second) = send(
        &app,
        "POST",
        "/api/v1/services/query",
        Some(json!({"query": "two", "conversation_id": "conv-h"})),
    )
    .await;
    assert_eq!(second["response"]["history_length"], 2);
}

#[tokio::test]
async fn test_register_with_limits() {
    let app = create_test_app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/services",
        Some(json!({
            "name": "capped",
            "endpoint": "echo://local",
            "max_concurrent_requests": 4,
            "timeout_seconds": 2.5
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_concurrent_requests"], 4);
    assert_eq!(body["timeout_seconds"], 2.5);

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/services",
        Some(json!({"name": "bad", "endpoint": "echo://local", "timeout_seconds": -1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_service() {
    let app = create_test_app();
    let registered = register_echo(&app, "echo").await;

    let (status, body) = send(
        &app,
        "PATCH",
        "/api/v1/services/echo",
        Some(json!({
            "description": "patched",
            "capabilities": ["chat"],
            "max_concurrent_requests": 2,
            "timeout_seconds": 1.5
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], registered["id"]);
    assert_eq!(body["description"], "patched");
    assert_eq!(body["capabilities"], json!(["chat"]));
    assert_eq!(body["max_concurrent_requests"], 2);
    assert_eq!(body["timeout_seconds"], 1.5);
    assert_eq!(body["endpoint"], "echo://local");

    let (status, body) = send(
        &app,
        "PATCH",
        "/api/v1/services/echo",
        Some(json!({"is_active": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);

    let (status, _) = send(
        &app,
        "PATCH",
        "/api/v1/services/echo",
        Some(json!({"endpoint": "ftp://files"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PATCH",
        "/api/v1/services/ghost",
        Some(json!({"description": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
