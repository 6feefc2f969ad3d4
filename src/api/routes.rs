//! API Routes
//!
//! Admin endpoints over the running engine.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{QueueItem, QueueMetrics, QueueOperation};
use crate::engine::TransactionEngine;
use crate::error::{AppError, AppResult};
use crate::metrics::{InMemoryMetrics, MetricsSnapshot};
use crate::processor::ProcessingError;
use crate::resilience::CircuitBreakerSnapshot;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TransactionEngine>,
    pub metrics: Arc<InMemoryMetrics>,
    /// Admin key; `None` disables the check
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(engine: Arc<TransactionEngine>, metrics: Arc<InMemoryMetrics>) -> Self {
        Self {
            engine,
            metrics,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.map(Arc::from);
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub transaction_id: Uuid,
    pub operation: QueueOperation,
    #[serde(default)]
    pub priority: i32,
}

/// Routes mounted under `/api/v1`
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/queue", post(enqueue))
        .route("/queue/metrics", get(queue_metrics))
        .route("/queue/:id", get(get_queue_item))
        .route("/queue/:id/process", post(process_queue_item))
        .route("/circuit-breaker", get(circuit_breaker))
        .route("/circuit-breaker/reset", post(reset_circuit_breaker))
        .route("/metrics", get(engine_metrics))
}

async fn enqueue(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> AppResult<(StatusCode, Json<QueueItem>)> {
    let item = state
        .engine
        .enqueue_transaction(request.transaction_id, request.operation, request.priority)
        .await?;

    Ok((StatusCode::CREATED, Json(item)))
}

async fn queue_metrics(State(state): State<AppState>) -> AppResult<Json<QueueMetrics>> {
    Ok(Json(state.engine.queue_metrics().await?))
}

async fn get_queue_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<QueueItem>> {
    Ok(Json(state.engine.stores().queue.get_by_id(id).await?))
}

/// Run one pending item now, outside the poll loop
async fn process_queue_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<QueueItem>> {
    let queue = &state.engine.stores().queue;
    let item = queue.get_by_id(id).await?;

    if !queue.mark_processing(id).await? {
        return Err(AppError::InvalidRequest(format!(
            "queue item {id} is {}, not pending",
            item.status
        )));
    }

    if let Err(e) = state.engine.process_queue_item(&item).await {
        if matches!(e, ProcessingError::CircuitOpen) {
            queue.release(id).await?;
        }
        return Err(e.into());
    }

    Ok(Json(queue.get_by_id(id).await?))
}

async fn circuit_breaker(State(state): State<AppState>) -> Json<CircuitBreakerSnapshot> {
    Json(state.engine.circuit_breaker().snapshot())
}

async fn reset_circuit_breaker(State(state): State<AppState>) -> Json<CircuitBreakerSnapshot> {
    let breaker = state.engine.circuit_breaker();
    breaker.reset();
    Json(breaker.snapshot())
}

async fn engine_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
