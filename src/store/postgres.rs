//! PostgreSQL stores
//!
//! sqlx-backed implementations of the store ports. Schema lives in
//! `migrations/0001_transaction_queue.sql`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    Account, Amount, DomainError, QueueItem, QueueMetrics, QueueOperation, Transaction,
    TransactionType,
};

use super::{AccountStore, QueueStore, StoreError, StoreResult, TransactionStore};

const TRANSACTION_COLUMNS: &str = r#"
    id, account_id, transaction_type, amount, balance_before, balance_after,
    status, version, reference, description, created_at, updated_at
"#;

const QUEUE_COLUMNS: &str = r#"
    id, transaction_id, operation, priority, status, retry_count, max_retries,
    scheduled_at, failure_reason, created_at, updated_at, started_at, completed_at
"#;

// =========================================================================
// Row types
// =========================================================================

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    account_id: Uuid,
    transaction_type: String,
    amount: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    status: String,
    version: i64,
    reference: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: row.id,
            account_id: row.account_id,
            transaction_type: row.transaction_type.parse()?,
            amount: Amount::new(row.amount).map_err(DomainError::from)?,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            status: row.status.parse()?,
            version: row.version,
            reference: row.reference,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    transaction_id: Uuid,
    operation: String,
    priority: i32,
    status: String,
    retry_count: i32,
    max_retries: i32,
    scheduled_at: DateTime<Utc>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<QueueRow> for QueueItem {
    type Error = StoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(QueueItem {
            id: row.id,
            transaction_id: row.transaction_id,
            operation: row.operation.parse()?,
            priority: row.priority,
            status: row.status.parse()?,
            retry_count: row.retry_count.max(0) as u32,
            max_retries: row.max_retries.max(0) as u32,
            scheduled_at: row.scheduled_at,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

// =========================================================================
// PgTransactionStore
// =========================================================================

#[derive(Debug, Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn insert(&self, transaction: &Transaction) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, account_id, transaction_type, amount, balance_before, balance_after,
                status, version, reference, description, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.account_id)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.amount.value())
        .bind(transaction.balance_before)
        .bind(transaction.balance_after)
        .bind(transaction.status.as_str())
        .bind(transaction.version)
        .bind(&transaction.reference)
        .bind(&transaction.description)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transaction> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| StoreError::transaction_not_found(id))?
            .try_into()
    }

    async fn get_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE reference = $1 ORDER BY created_at ASC, id ASC LIMIT 1"
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn update_with_optimistic_lock(
        &self,
        transaction: &Transaction,
        expected_version: i64,
    ) -> StoreResult<Transaction> {
        let sql = format!(
            r#"
            UPDATE transactions
            SET status = $3,
                balance_before = $4,
                balance_after = $5,
                description = $6,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {TRANSACTION_COLUMNS}
            "#
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(transaction.id)
            .bind(expected_version)
            .bind(transaction.status.as_str())
            .bind(transaction.balance_before)
            .bind(transaction.balance_after)
            .bind(&transaction.description)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return row.try_into();
        }

        // Nothing matched: either the row is gone or someone else bumped the version
        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM transactions WHERE id = $1")
            .bind(transaction.id)
            .fetch_optional(&self.pool)
            .await?;

        match actual {
            Some(actual) => Err(StoreError::VersionConflict {
                id: transaction.id,
                expected: expected_version,
                actual,
            }),
            None => Err(StoreError::transaction_not_found(transaction.id)),
        }
    }
}

// =========================================================================
// PgAccountStore
// =========================================================================

#[derive(Debug, Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn insert(&self, account: &Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, customer_id, balance, currency, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(account.id)
        .bind(account.customer_id)
        .bind(account.balance)
        .bind(&account.currency)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Account> {
        let row: Option<(Uuid, Uuid, Decimal, String, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, customer_id, balance, currency, created_at, updated_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let (id, customer_id, balance, currency, created_at, updated_at) =
            row.ok_or_else(|| StoreError::account_not_found(id))?;

        Ok(Account {
            id,
            customer_id,
            balance,
            currency,
            created_at,
            updated_at,
        })
    }

    async fn update_balance(
        &self,
        account_id: Uuid,
        new_balance: Decimal,
        operation_type: TransactionType,
    ) -> StoreResult<()> {
        let rows = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $2, last_operation = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(new_balance)
        .bind(operation_type.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::account_not_found(account_id));
        }

        Ok(())
    }
}

// =========================================================================
// PgQueueStore
// =========================================================================

#[derive(Debug, Clone)]
pub struct PgQueueStore {
    pool: PgPool,
    default_max_retries: u32,
}

impl PgQueueStore {
    pub fn new(pool: PgPool, default_max_retries: u32) -> Self {
        Self {
            pool,
            default_max_retries,
        }
    }

    async fn set_status(&self, id: Uuid, sql: &str, reason: Option<&str>) -> StoreResult<()> {
        let rows = sqlx::query(sql)
            .bind(id)
            .bind(reason)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(StoreError::queue_item_not_found(id));
        }

        Ok(())
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue(
        &self,
        transaction_id: Uuid,
        operation: QueueOperation,
        priority: i32,
    ) -> StoreResult<QueueItem> {
        let item = QueueItem::new(transaction_id, operation, priority, self.default_max_retries);

        sqlx::query(
            r#"
            INSERT INTO transaction_queue (
                id, transaction_id, operation, priority, status, retry_count, max_retries,
                scheduled_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(item.id)
        .bind(item.transaction_id)
        .bind(item.operation.as_str())
        .bind(item.priority)
        .bind(item.status.as_str())
        .bind(item.retry_count as i32)
        .bind(item.max_retries as i32)
        .bind(item.scheduled_at)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(item)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<QueueItem> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM transaction_queue WHERE id = $1");
        let row: Option<QueueRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| StoreError::queue_item_not_found(id))?
            .try_into()
    }

    async fn fetch_pending(&self, limit: usize) -> StoreResult<Vec<QueueItem>> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS}
            FROM transaction_queue
            WHERE status = 'pending' AND scheduled_at <= NOW()
            ORDER BY priority DESC, scheduled_at ASC, created_at ASC
            LIMIT $1
            "#
        );
        let rows: Vec<QueueRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(QueueItem::try_from).collect()
    }

    async fn mark_processing(&self, id: Uuid) -> StoreResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE transaction_queue
            SET status = 'processing', started_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows == 1)
    }

    async fn mark_completed(&self, id: Uuid) -> StoreResult<()> {
        self.set_status(
            id,
            r#"
            UPDATE transaction_queue
            SET status = 'completed', failure_reason = $2, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
            None,
        )
        .await
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> StoreResult<()> {
        self.set_status(
            id,
            r#"
            UPDATE transaction_queue
            SET status = 'failed', failure_reason = $2, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
            Some(reason),
        )
        .await
    }

    async fn increment_retry(&self, id: Uuid) -> StoreResult<()> {
        self.set_status(
            id,
            r#"
            UPDATE transaction_queue
            SET retry_count = retry_count + 1,
                status = 'pending',
                failure_reason = $2,
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
            None,
        )
        .await
    }

    async fn release(&self, id: Uuid) -> StoreResult<()> {
        let exists: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE transaction_queue
            SET status = CASE WHEN status = 'processing' THEN 'pending' ELSE status END,
                started_at = CASE WHEN status = 'processing' THEN NULL ELSE started_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        exists
            .map(|_| ())
            .ok_or_else(|| StoreError::queue_item_not_found(id))
    }

    async fn requeue_stale(&self, older_than: Duration) -> StoreResult<u64> {
        let rows = sqlx::query(
            r#"
            UPDATE transaction_queue
            SET status = 'pending', started_at = NULL, updated_at = NOW()
            WHERE status = 'processing'
              AND (started_at IS NULL OR started_at <= NOW() - make_interval(secs => $1))
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    async fn metrics(&self) -> StoreResult<QueueMetrics> {
        let (pending, processing, completed, failed, avg_ms, oldest_ms): (i64, i64, i64, i64, f64, f64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'pending'),
                    COUNT(*) FILTER (WHERE status = 'processing'),
                    COUNT(*) FILTER (WHERE status = 'completed'),
                    COUNT(*) FILTER (WHERE status = 'failed'),
                    COALESCE(
                        AVG(EXTRACT(EPOCH FROM (completed_at - started_at)) * 1000)
                            FILTER (WHERE status = 'completed' AND started_at IS NOT NULL),
                        0
                    )::FLOAT8,
                    COALESCE(
                        EXTRACT(EPOCH FROM (NOW() - MIN(created_at) FILTER (WHERE status = 'pending'))) * 1000,
                        0
                    )::FLOAT8
                FROM transaction_queue
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(QueueMetrics {
            pending_count: pending as u64,
            processing_count: processing as u64,
            completed_count: completed as u64,
            failed_count: failed as u64,
            avg_processing_ms: avg_ms,
            oldest_pending_age: Duration::from_millis(oldest_ms.max(0.0) as u64),
        })
    }
}
