//! Admin API integration tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use ledger_engine::api::{self, AppState};
use ledger_engine::domain::QueueItemStatus;
use ledger_engine::{QueueOperation, TransactionType};

mod common;

use common::{engine_config, TestEngine};

const API_KEY: &str = "test_key_123";

fn app(t: &TestEngine, api_key: Option<&str>) -> Router {
    let state = AppState::new(t.engine.clone(), t.metrics.clone())
        .with_api_key(api_key.map(str::to_string));
    api::build_router(state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("X-API-Key", API_KEY)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("X-API-Key", API_KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_needs_no_key() {
    let t = TestEngine::new(engine_config(2, 5));
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = app(&t, Some(API_KEY)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_enqueue_then_process_over_http() {
    let t = TestEngine::new(engine_config(2, 5));
    let account = t.seed_account(dec!(40)).await;
    let tx = t
        .seed_transaction(&account, TransactionType::Credit, dec!(10), "api-1")
        .await;
    let app = app(&t, Some(API_KEY));

    // 1. Enqueue
    let response = app
        .clone()
        .oneshot(post(
            "/api/v1/queue",
            json!({ "transaction_id": tx.id, "operation": "process", "priority": 3 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let item = body_json(response).await;
    assert_eq!(item["status"], "pending");
    assert_eq!(item["priority"], 3);
    assert_eq!(item["retry_count"], 0);
    let item_id = item["id"].as_str().unwrap().to_string();

    // 2. Read it back
    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/queue/{item_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["operation"], "process");

    // 3. Process it directly
    let response = app
        .clone()
        .oneshot(post(&format!("/api/v1/queue/{item_id}/process"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "completed");
    assert_eq!(t.balance(account.id).await, dec!(50));

    // 4. A second run is refused: the item is no longer pending
    let response = app
        .clone()
        .oneshot(post(&format!("/api/v1/queue/{item_id}/process"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_code"], "invalid_request");

    // 5. Metrics
    let response = app.clone().oneshot(get("/api/v1/queue/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let metrics = body_json(response).await;
    assert_eq!(metrics["completed_count"], 1);
    assert_eq!(metrics["pending_count"], 0);

    let response = app.oneshot(get("/api/v1/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(
        snapshot["counters"]["queue.items.processed{operation=process,outcome=success}"],
        1
    );
}

#[tokio::test]
async fn test_enqueue_unknown_transaction_is_not_found() {
    let t = TestEngine::new(engine_config(2, 5));
    let response = app(&t, None)
        .oneshot(post(
            "/api/v1/queue",
            json!({ "transaction_id": Uuid::new_v4(), "operation": "reverse" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error_code"], "not_found");
}

#[tokio::test]
async fn test_unknown_queue_item_is_not_found() {
    let t = TestEngine::new(engine_config(2, 5));
    let response = app(&t, None)
        .oneshot(get(&format!("/api/v1/queue/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_process_with_open_circuit_returns_503_and_releases() {
    let t = TestEngine::new(engine_config(2, 1));
    let account = t.seed_account(dec!(40)).await;
    let tx = t
        .seed_transaction(&account, TransactionType::Credit, dec!(10), "")
        .await;
    let item = t
        .engine
        .enqueue_transaction(tx.id, QueueOperation::Process, 0)
        .await
        .unwrap();
    t.engine.circuit_breaker().record_failure();
    let app = app(&t, Some(API_KEY));

    let response = app
        .clone()
        .oneshot(post(&format!("/api/v1/queue/{}/process", item.id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error_code"], "circuit_open");

    let stored = ledger_engine::store::QueueStore::get_by_id(&t.queue, item.id)
        .await
        .unwrap();
    assert_eq!(stored.status, QueueItemStatus::Pending);
    assert_eq!(stored.retry_count, 0);

    // Inspect and reset the breaker
    let response = app.clone().oneshot(get("/api/v1/circuit-breaker")).await.unwrap();
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["state"], "open");
    assert_eq!(snapshot["failure_count"], 1);

    let response = app
        .clone()
        .oneshot(post("/api/v1/circuit-breaker/reset", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["state"], "closed");
    assert_eq!(snapshot["failure_count"], 0);

    let response = app
        .oneshot(post(&format!("/api/v1/queue/{}/process", item.id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_api_key_is_enforced() {
    let t = TestEngine::new(engine_config(2, 5));
    let app = app(&t, Some(API_KEY));

    let missing = Request::builder()
        .uri("/api/v1/queue/metrics")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(missing).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_code"], "missing_header");

    let wrong = Request::builder()
        .uri("/api/v1/queue/metrics")
        .header("X-API-Key", "nope")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(wrong).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error_code"], "invalid_api_key");
}
