//! Store module
//!
//! Persistence ports the engine depends on, plus an in-memory and a
//! PostgreSQL implementation of each.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{Account, QueueItem, QueueMetrics, QueueOperation, Transaction, TransactionType};

pub use error::StoreError;
pub use memory::{InMemoryAccountStore, InMemoryQueueStore, InMemoryTransactionStore};
pub use postgres::{PgAccountStore, PgQueueStore, PgTransactionStore};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, transaction: &Transaction) -> StoreResult<()>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transaction>;

    /// Earliest-created transaction carrying `reference`, if any
    async fn get_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>>;

    /// Compare-and-swap write.
    ///
    /// Succeeds only if the stored version equals `expected_version`; the
    /// stored version becomes `expected_version + 1` and the written row is
    /// returned. A mismatch yields `StoreError::VersionConflict`.
    async fn update_with_optimistic_lock(
        &self,
        transaction: &Transaction,
        expected_version: i64,
    ) -> StoreResult<Transaction>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert(&self, account: &Account) -> StoreResult<()>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Account>;

    async fn update_balance(
        &self,
        account_id: Uuid,
        new_balance: Decimal,
        operation_type: TransactionType,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(
        &self,
        transaction_id: Uuid,
        operation: QueueOperation,
        priority: i32,
    ) -> StoreResult<QueueItem>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<QueueItem>;

    /// Pending items due now, highest priority first, then oldest first
    async fn fetch_pending(&self, limit: usize) -> StoreResult<Vec<QueueItem>>;

    /// Claim a pending item for a worker. Returns false if it is no longer pending.
    async fn mark_processing(&self, id: Uuid) -> StoreResult<bool>;

    async fn mark_completed(&self, id: Uuid) -> StoreResult<()>;

    async fn mark_failed(&self, id: Uuid, reason: &str) -> StoreResult<()>;

    /// Bump the retry counter and hand the item back to the pending pool
    async fn increment_retry(&self, id: Uuid) -> StoreResult<()>;

    /// Undo a claim without touching the retry counter
    async fn release(&self, id: Uuid) -> StoreResult<()>;

    /// Return items claimed longer than `older_than` ago to the pending pool.
    /// Covers workers that died mid-item. Returns the number released.
    async fn requeue_stale(&self, older_than: Duration) -> StoreResult<u64>;

    async fn metrics(&self) -> StoreResult<QueueMetrics>;
}

/// The three stores the engine works against
#[derive(Clone)]
pub struct Stores {
    pub transactions: Arc<dyn TransactionStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub queue: Arc<dyn QueueStore>,
}

impl Stores {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        accounts: Arc<dyn AccountStore>,
        queue: Arc<dyn QueueStore>,
    ) -> Self {
        Self {
            transactions,
            accounts,
            queue,
        }
    }

    /// PostgreSQL-backed stores sharing one pool
    pub fn postgres(pool: sqlx::PgPool, default_max_retries: u32) -> Self {
        Self::new(
            Arc::new(PgTransactionStore::new(pool.clone())),
            Arc::new(PgAccountStore::new(pool.clone())),
            Arc::new(PgQueueStore::new(pool, default_max_retries)),
        )
    }
}
