//! HTTP gateway tests
//!
//! Drives the router in process and checks payloads and status mapping.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use cmdb_authz::gateway::{create_router, AppState};
use cmdb_authz::{
    Action, BusinessScopeCache, Classifier, InMemoryAuthCenter, ResourceType, WarmRefreshPolicy,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn router(engine: Arc<InMemoryAuthCenter>) -> Router {
    let cache = BusinessScopeCache::new(engine.clone(), WarmRefreshPolicy::FailRequest);
    let state = AppState::new(
        Arc::new(Classifier::new().unwrap()),
        engine,
        Arc::new(cache),
    );
    create_router(state)
}

async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(body) => {
            request = request.header("content-type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };

    let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn alice() -> Value {
    json!({"user_name": "alice", "supplier_account": "0"})
}

// ============================================================================
// CLASSIFY
// ============================================================================

#[tokio::test]
async fn test_classify_endpoint() {
    let app = router(Arc::new(InMemoryAuthCenter::new()));

    let (status, body) = call(
        app,
        "POST",
        "/v1/classify",
        Some(json!({"method": "post", "uri": "/api/v3/hosts/search", "body": {"bk_biz_id": 3}})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resources"][0]["type"], "host_instance");
    assert_eq!(body["resources"][0]["action"], "find_many");
    assert_eq!(body["resources"][0]["business_id"], 3);
}

#[tokio::test]
async fn test_classify_unmatched_is_empty() {
    let app = router(Arc::new(InMemoryAuthCenter::new()));
    let (status, body) = call(
        app,
        "POST",
        "/v1/classify",
        Some(json!({"method": "GET", "uri": "/api/v3/nothing"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resources"], json!([]));
}

#[tokio::test]
async fn test_classification_error_is_bad_request() {
    let app = router(Arc::new(InMemoryAuthCenter::new()));
    let (status, body) = call(
        app,
        "POST",
        "/v1/classify",
        Some(json!({"method": "POST", "uri": "/api/v3/hosts/modules", "body": {"bk_biz_id": 0}})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "classification_error");
}

#[tokio::test]
async fn test_invalid_method_is_bad_request() {
    let app = router(Arc::new(InMemoryAuthCenter::new()));
    let (status, body) = call(
        app,
        "POST",
        "/v1/classify",
        Some(json!({"method": "NOT A METHOD", "uri": "/api/v3/hosts/search"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
}

// ============================================================================
// AUTHORIZE
// ============================================================================

#[tokio::test]
async fn test_authorize_granted_and_denied() {
    let engine = Arc::new(InMemoryAuthCenter::new());
    engine
        .grant_type("alice", ResourceType::HostInstance, Action::FindMany, 3)
        .await
        .unwrap();

    let request = |user: Value| {
        json!({
            "user": user,
            "method": "POST",
            "uri": "/api/v3/hosts/search",
            "body": {"bk_biz_id": 3}
        })
    };

    let (status, body) = call(router(engine.clone()), "POST", "/v1/authorize", Some(request(alice()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authorized"], true);
    assert_eq!(body["resources"][0]["business_id"], 3);

    let bob = json!({"user_name": "bob", "supplier_account": "0"});
    let (status, body) = call(router(engine), "POST", "/v1/authorize", Some(request(bob))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authorized"], false);
}

#[tokio::test]
async fn test_unreachable_engine_is_service_unavailable() {
    let engine = Arc::new(InMemoryAuthCenter::new());
    engine.set_unavailable(true);

    let (status, body) = call(
        router(engine),
        "POST",
        "/v1/authorize",
        Some(json!({
            "user": alice(),
            "method": "DELETE",
            "uri": "/api/v3/biz/0/42"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "indeterminate");
}

#[tokio::test]
async fn test_authorize_batch_endpoint() {
    let engine = Arc::new(InMemoryAuthCenter::new());
    engine
        .grant_type("alice", ResourceType::Business, Action::Find, 0)
        .await
        .unwrap();

    let (status, body) = call(
        router(engine),
        "POST",
        "/v1/authorize/batch",
        Some(json!({
            "user": alice(),
            "resources": [
                {"type": "business", "action": "find", "instance_id": 1},
                {"type": "host_instance", "action": "skip_action"},
                {"type": "business", "action": "delete", "instance_id": 1}
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let decisions = body["decisions"].as_array().unwrap();
    assert_eq!(decisions.len(), 3);
    assert_eq!(decisions[0]["authorized"], true);
    assert_eq!(decisions[1]["authorized"], true);
    assert_eq!(decisions[2]["authorized"], false);
}

// ============================================================================
// BUSINESSES AND HEALTH
// ============================================================================

#[tokio::test]
async fn test_businesses_endpoint() {
    let engine = Arc::new(InMemoryAuthCenter::new());
    engine.grant_business("alice", 3).await;
    engine.grant_business("alice", 1).await;

    let (status, body) = call(router(engine), "POST", "/v1/businesses", Some(alice())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["businesses"], json!([1, 3]));

    let (_, body) = call(
        router(Arc::new(InMemoryAuthCenter::disabled())),
        "POST",
        "/v1/businesses",
        Some(alice()),
    )
    .await;
    assert!(body["businesses"].is_null());
}

#[tokio::test]
async fn test_businesses_refresh_failure() {
    let engine = Arc::new(InMemoryAuthCenter::new());
    engine.set_unavailable(true);

    let (status, body) = call(router(engine), "POST", "/v1/businesses", Some(alice())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "cache_refresh_error");
}

#[tokio::test]
async fn test_health_check() {
    let engine = Arc::new(InMemoryAuthCenter::new());

    let (status, body) = call(router(engine.clone()), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["enforcement"], true);
    assert_eq!(body["version"], cmdb_authz::VERSION);

    engine.set_unavailable(true);
    let (status, body) = call(router(engine), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
}
