//! Audit Log
//!
//! Every state transition the engine makes is emitted as an audit record.
//! Emission is fire-and-forget: a failing sink never fails processing.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    ItemEnqueued,
    ProcessingStarted,
    ProcessingCompleted,
    ProcessingFailed,
    DuplicateReference,
    LockConflict,
    /// Terminal failure that did not touch a transaction which already moved money
    TransactionLeftUnchanged,
    RetryScheduled,
    BalanceUpdated,
    CircuitOpened,
    CircuitHalfOpen,
    CircuitClosed,
    CircuitReset,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ItemEnqueued => "queue.item_enqueued",
            AuditAction::ProcessingStarted => "transaction.processing_started",
            AuditAction::ProcessingCompleted => "transaction.processing_completed",
            AuditAction::ProcessingFailed => "transaction.processing_failed",
            AuditAction::DuplicateReference => "transaction.duplicate_reference",
            AuditAction::LockConflict => "transaction.lock_conflict",
            AuditAction::TransactionLeftUnchanged => "transaction.left_unchanged",
            AuditAction::RetryScheduled => "transaction.retry_scheduled",
            AuditAction::BalanceUpdated => "account.balance_updated",
            AuditAction::CircuitOpened => "circuit_breaker.opened",
            AuditAction::CircuitHalfOpen => "circuit_breaker.half_open",
            AuditAction::CircuitClosed => "circuit_breaker.closed",
            AuditAction::CircuitReset => "circuit_breaker.reset",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for audit records
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: AuditAction,
    resource_type: Option<String>,
    resource_id: Option<Uuid>,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
    details: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl AuditLogBuilder {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            resource_type: None,
            resource_id: None,
            before_state: None,
            after_state: None,
            details: None,
            created_at: Utc::now(),
        }
    }

    /// Shorthand for a record about one transaction
    pub fn transaction(action: AuditAction, transaction_id: Uuid) -> Self {
        Self::new(action)
            .resource_type("Transaction")
            .resource_id(transaction_id)
    }

    pub fn resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self
    }

    pub fn resource_id(mut self, resource_id: Uuid) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn before_state<T: Serialize>(mut self, state: &T) -> Self {
        self.before_state = serde_json::to_value(state).ok();
        self
    }

    pub fn after_state<T: Serialize>(mut self, state: &T) -> Self {
        self.after_state = serde_json::to_value(state).ok();
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn get_resource_id(&self) -> Option<Uuid> {
        self.resource_id
    }

    pub fn get_details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

    pub fn get_before_state(&self) -> Option<&serde_json::Value> {
        self.before_state.as_ref()
    }

    pub fn get_after_state(&self) -> Option<&serde_json::Value> {
        self.after_state.as_ref()
    }
}

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    /// Record an event. Must not block and must not fail the caller.
    fn emit(&self, record: AuditLogBuilder);
}

/// Writes audit records as structured `tracing` events
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: AuditLogBuilder) {
        tracing::info!(
            target: "audit",
            action = %record.action,
            resource_type = ?record.resource_type,
            resource_id = ?record.resource_id,
            before = ?record.before_state,
            after = ?record.after_state,
            details = ?record.details,
            "audit"
        );
    }
}

/// Keeps every record in memory; used by tests to assert on transitions
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditLogBuilder>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditLogBuilder> {
        self.records.lock().clone()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.records.lock().iter().filter(|r| r.action == action).count()
    }

    pub fn for_resource(&self, resource_id: Uuid) -> Vec<AuditLogBuilder> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.resource_id == Some(resource_id))
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, record: AuditLogBuilder) {
        self.records.lock().push(record);
    }
}

/// Persists audit records to `audit_logs` on a background task
#[derive(Debug, Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

/// Stored audit record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one record, awaiting the write
    pub async fn write(&self, record: &AuditLogBuilder) -> Result<Uuid, AuditLogError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, action, resource_type, resource_id,
                before_state, after_state, details, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(record.action.as_str())
        .bind(&record.resource_type)
        .bind(record.resource_id)
        .bind(&record.before_state)
        .bind(&record.after_state)
        .bind(&record.details)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(audit_id = %id, action = %record.action, "Audit log entry created");

        Ok(id)
    }

    /// Audit trail of one resource, newest first
    pub async fn get_by_resource(
        &self,
        resource_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT id, action, resource_type, resource_id,
                   before_state, after_state, details, created_at
            FROM audit_logs
            WHERE resource_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(resource_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

impl AuditSink for PgAuditSink {
    fn emit(&self, record: AuditLogBuilder) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(action = %record.action, "No runtime available, audit record dropped");
            return;
        };

        let sink = self.clone();
        handle.spawn(async move {
            if let Err(e) = sink.write(&record).await {
                tracing::error!(error = %e, action = %record.action, "Failed to persist audit record");
            }
        });
    }
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
