//! Common test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use ledger_engine::audit::MemoryAuditSink;
use ledger_engine::metrics::InMemoryMetrics;
use ledger_engine::resilience::CircuitBreakerConfig;
use ledger_engine::scheduler::SchedulerConfig;
use ledger_engine::store::{
    AccountStore, InMemoryAccountStore, InMemoryQueueStore, InMemoryTransactionStore, QueueStore,
    StoreError, StoreResult, Stores, TransactionStore,
};
use ledger_engine::domain::{QueueItem, QueueMetrics};
use ledger_engine::{
    Account, Amount, EngineConfig, QueueOperation, Transaction, TransactionEngine,
    TransactionType,
};

pub const MAX_RETRIES: u32 = 3;

/// Connect to the migrated database named by DATABASE_URL
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    assert!(
        ledger_engine::db::check_schema(&pool).await.unwrap(),
        "run migrations/0001_transaction_queue.sql first"
    );
    pool
}

/// Engine over in-memory stores with handles to every collaborator
pub struct TestEngine {
    pub engine: Arc<TransactionEngine>,
    pub transactions: InMemoryTransactionStore,
    pub accounts: InMemoryAccountStore,
    pub queue: InMemoryQueueStore,
    pub audit: Arc<MemoryAuditSink>,
    pub metrics: Arc<InMemoryMetrics>,
}

pub fn engine_config(max_workers: usize, max_failures: u32) -> EngineConfig {
    EngineConfig {
        scheduler: SchedulerConfig {
            max_workers,
            poll_interval: Duration::from_millis(10),
            ..SchedulerConfig::default()
        },
        circuit_breaker: CircuitBreakerConfig {
            max_failures,
            reset_timeout: Duration::from_secs(60),
            half_open_max_successes: 1,
        },
    }
}

impl TestEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::build(config, |store| Arc::new(store), |queue| Arc::new(queue))
    }

    /// Build with the transaction store wrapped, e.g. for fault injection
    pub fn with_transaction_store<F>(config: EngineConfig, wrap: F) -> Self
    where
        F: FnOnce(InMemoryTransactionStore) -> Arc<dyn TransactionStore>,
    {
        Self::build(config, wrap, |queue| Arc::new(queue))
    }

    /// Build with the queue store wrapped
    pub fn with_queue_store<F>(config: EngineConfig, wrap: F) -> Self
    where
        F: FnOnce(InMemoryQueueStore) -> Arc<dyn QueueStore>,
    {
        Self::build(config, |store| Arc::new(store), wrap)
    }

    fn build<T, Q>(config: EngineConfig, wrap_transactions: T, wrap_queue: Q) -> Self
    where
        T: FnOnce(InMemoryTransactionStore) -> Arc<dyn TransactionStore>,
        Q: FnOnce(InMemoryQueueStore) -> Arc<dyn QueueStore>,
    {
        let transactions = InMemoryTransactionStore::new();
        let accounts = InMemoryAccountStore::new();
        let queue = InMemoryQueueStore::new(MAX_RETRIES);
        let audit = Arc::new(MemoryAuditSink::new());
        let metrics = Arc::new(InMemoryMetrics::new());

        let stores = Stores::new(
            wrap_transactions(transactions.clone()),
            Arc::new(accounts.clone()),
            wrap_queue(queue.clone()),
        );
        let engine = Arc::new(TransactionEngine::new(
            stores,
            audit.clone(),
            metrics.clone(),
            config,
        ));

        Self {
            engine,
            transactions,
            accounts,
            queue,
            audit,
            metrics,
        }
    }

    pub async fn seed_account(&self, balance: Decimal) -> Account {
        let account = Account::new(Uuid::new_v4(), "USD").with_balance(balance);
        self.accounts.insert(&account).await.unwrap();
        account
    }

    pub async fn seed_transaction(
        &self,
        account: &Account,
        transaction_type: TransactionType,
        amount: Decimal,
        reference: &str,
    ) -> Transaction {
        let tx = Transaction::new_pending(
            account,
            transaction_type,
            Amount::new(amount).unwrap(),
            reference,
        )
        .unwrap();
        self.transactions.insert(&tx).await.unwrap();
        tx
    }

    pub async fn balance(&self, account_id: Uuid) -> Decimal {
        self.accounts.get_by_id(account_id).await.unwrap().balance
    }

    /// Wait until nothing is pending or processing
    pub async fn wait_until_drained(&self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            loop {
                let metrics = self.queue.metrics().await.unwrap();
                if metrics.pending_count == 0 && metrics.processing_count == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue did not drain in time");
    }
}

/// Reports a version conflict on the next `conflicts` optimistic writes
pub struct ConflictingTransactionStore {
    inner: InMemoryTransactionStore,
    conflicts: AtomicUsize,
}

impl ConflictingTransactionStore {
    pub fn new(inner: InMemoryTransactionStore, conflicts: usize) -> Self {
        Self {
            inner,
            conflicts: AtomicUsize::new(conflicts),
        }
    }
}

#[async_trait]
impl TransactionStore for ConflictingTransactionStore {
    async fn insert(&self, transaction: &Transaction) -> StoreResult<()> {
        self.inner.insert(transaction).await
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transaction> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        self.inner.get_by_reference(reference).await
    }

    async fn update_with_optimistic_lock(
        &self,
        transaction: &Transaction,
        expected_version: i64,
    ) -> StoreResult<Transaction> {
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::VersionConflict {
                id: transaction.id,
                expected: expected_version,
                actual: expected_version + 1,
            });
        }
        self.inner
            .update_with_optimistic_lock(transaction, expected_version)
            .await
    }
}

/// Every read fails as if the database were down
pub struct UnavailableTransactionStore {
    inner: InMemoryTransactionStore,
}

impl UnavailableTransactionStore {
    pub fn new(inner: InMemoryTransactionStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl TransactionStore for UnavailableTransactionStore {
    async fn insert(&self, transaction: &Transaction) -> StoreResult<()> {
        self.inner.insert(transaction).await
    }

    async fn get_by_id(&self, _id: Uuid) -> StoreResult<Transaction> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn get_by_reference(&self, _reference: &str) -> StoreResult<Option<Transaction>> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn update_with_optimistic_lock(
        &self,
        _transaction: &Transaction,
        _expected_version: i64,
    ) -> StoreResult<Transaction> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }
}

/// Delays every read and records how many reads overlapped
pub struct SlowTransactionStore {
    inner: InMemoryTransactionStore,
    delay: Duration,
    active: AtomicUsize,
    pub max_active: Arc<AtomicUsize>,
}

impl SlowTransactionStore {
    pub fn new(inner: InMemoryTransactionStore, delay: Duration, max_active: Arc<AtomicUsize>) -> Self {
        Self {
            inner,
            delay,
            active: AtomicUsize::new(0),
            max_active,
        }
    }
}

#[async_trait]
impl TransactionStore for SlowTransactionStore {
    async fn insert(&self, transaction: &Transaction) -> StoreResult<()> {
        self.inner.insert(transaction).await
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transaction> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.get_by_id(id).await
    }

    async fn get_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        self.inner.get_by_reference(reference).await
    }

    async fn update_with_optimistic_lock(
        &self,
        transaction: &Transaction,
        expected_version: i64,
    ) -> StoreResult<Transaction> {
        self.inner
            .update_with_optimistic_lock(transaction, expected_version)
            .await
    }
}

/// Queue store whose next `mark_completed` / `increment_retry` calls fail
/// as if the database were down. Everything else goes straight through.
pub struct FlakyQueueStore {
    inner: InMemoryQueueStore,
    pub fail_mark_completed: AtomicUsize,
    pub fail_increment_retry: AtomicUsize,
}

impl FlakyQueueStore {
    pub fn new(inner: InMemoryQueueStore) -> Self {
        Self {
            inner,
            fail_mark_completed: AtomicUsize::new(0),
            fail_increment_retry: AtomicUsize::new(0),
        }
    }

    pub fn failing_mark_completed(self, times: usize) -> Self {
        self.fail_mark_completed.store(times, Ordering::SeqCst);
        self
    }

    pub fn failing_increment_retry(self, times: usize) -> Self {
        self.fail_increment_retry.store(times, Ordering::SeqCst);
        self
    }

    fn take(counter: &AtomicUsize) -> StoreResult<()> {
        match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
            Ok(_) => Err(StoreError::Database(sqlx::Error::PoolTimedOut)),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl QueueStore for FlakyQueueStore {
    async fn enqueue(
        &self,
        transaction_id: Uuid,
        operation: QueueOperation,
        priority: i32,
    ) -> StoreResult<QueueItem> {
        self.inner.enqueue(transaction_id, operation, priority).await
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<QueueItem> {
        self.inner.get_by_id(id).await
    }

    async fn fetch_pending(&self, limit: usize) -> StoreResult<Vec<QueueItem>> {
        self.inner.fetch_pending(limit).await
    }

    async fn mark_processing(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.mark_processing(id).await
    }

    async fn mark_completed(&self, id: Uuid) -> StoreResult<()> {
        Self::take(&self.fail_mark_completed)?;
        self.inner.mark_completed(id).await
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> StoreResult<()> {
        self.inner.mark_failed(id, reason).await
    }

    async fn increment_retry(&self, id: Uuid) -> StoreResult<()> {
        Self::take(&self.fail_increment_retry)?;
        self.inner.increment_retry(id).await
    }

    async fn release(&self, id: Uuid) -> StoreResult<()> {
        self.inner.release(id).await
    }

    async fn requeue_stale(&self, older_than: Duration) -> StoreResult<u64> {
        self.inner.requeue_stale(older_than).await
    }

    async fn metrics(&self) -> StoreResult<QueueMetrics> {
        self.inner.metrics().await
    }
}
