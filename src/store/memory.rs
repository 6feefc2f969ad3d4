//! In-memory stores
//!
//! Thread-safe implementations of the store ports over
//! `Arc<RwLock<HashMap<..>>>`. Used by the test suite and the load tool.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    Account, QueueItem, QueueItemStatus, QueueMetrics, QueueOperation, Transaction,
    TransactionType,
};

use super::{AccountStore, QueueStore, StoreError, StoreResult, TransactionStore};

/// Transactions keyed by id
#[derive(Debug, Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<Uuid, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, transaction: &Transaction) -> StoreResult<()> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&transaction.id) {
            return Err(StoreError::AlreadyExists {
                entity: "Transaction",
                id: transaction.id,
            });
        }
        transactions.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transaction> {
        let transactions = self.transactions.read().await;
        transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::transaction_not_found(id))
    }

    async fn get_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .filter(|tx| tx.reference == reference)
            .min_by_key(|tx| (tx.created_at, tx.id))
            .cloned())
    }

    async fn update_with_optimistic_lock(
        &self,
        transaction: &Transaction,
        expected_version: i64,
    ) -> StoreResult<Transaction> {
        let mut transactions = self.transactions.write().await;
        let stored = transactions
            .get_mut(&transaction.id)
            .ok_or_else(|| StoreError::transaction_not_found(transaction.id))?;

        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: transaction.id,
                expected: expected_version,
                actual: stored.version,
            });
        }

        let mut updated = transaction.clone();
        updated.version = expected_version + 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }
}

/// Accounts keyed by id
#[derive(Debug, Default, Clone)]
pub struct InMemoryAccountStore {
    accounts: Arc<RwLock<HashMap<Uuid, Account>>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn insert(&self, account: &Account) -> StoreResult<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Err(StoreError::AlreadyExists {
                entity: "Account",
                id: account.id,
            });
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Account> {
        let accounts = self.accounts.read().await;
        accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::account_not_found(id))
    }

    async fn update_balance(
        &self,
        account_id: Uuid,
        new_balance: Decimal,
        _operation_type: TransactionType,
    ) -> StoreResult<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&account_id)
            .ok_or_else(|| StoreError::account_not_found(account_id))?;
        account.balance = new_balance;
        account.updated_at = Utc::now();
        Ok(())
    }
}

/// Queue items keyed by id
#[derive(Debug, Clone)]
pub struct InMemoryQueueStore {
    items: Arc<RwLock<HashMap<Uuid, QueueItem>>>,
    default_max_retries: u32,
}

impl InMemoryQueueStore {
    pub fn new(default_max_retries: u32) -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
            default_max_retries,
        }
    }

    /// Insert a fully-formed item, bypassing `enqueue` defaults
    pub async fn insert(&self, item: QueueItem) {
        self.items.write().await.insert(item.id, item);
    }

    pub async fn all(&self) -> Vec<QueueItem> {
        self.items.read().await.values().cloned().collect()
    }

    async fn update<F>(&self, id: Uuid, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut QueueItem) + Send,
    {
        let mut items = self.items.write().await;
        let item = items
            .get_mut(&id)
            .ok_or_else(|| StoreError::queue_item_not_found(id))?;
        f(item);
        item.updated_at = Utc::now();
        Ok(())
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(
        &self,
        transaction_id: Uuid,
        operation: QueueOperation,
        priority: i32,
    ) -> StoreResult<QueueItem> {
        let item = QueueItem::new(transaction_id, operation, priority, self.default_max_retries);
        self.items.write().await.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<QueueItem> {
        let items = self.items.read().await;
        items
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::queue_item_not_found(id))
    }

    async fn fetch_pending(&self, limit: usize) -> StoreResult<Vec<QueueItem>> {
        let now = Utc::now();
        let items = self.items.read().await;
        let mut pending: Vec<QueueItem> = items
            .values()
            .filter(|item| item.status == QueueItemStatus::Pending && item.scheduled_at <= now)
            .cloned()
            .collect();

        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_at.cmp(&b.scheduled_at))
                .then(a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processing(&self, id: Uuid) -> StoreResult<bool> {
        let mut items = self.items.write().await;
        let item = items
            .get_mut(&id)
            .ok_or_else(|| StoreError::queue_item_not_found(id))?;
        if item.status != QueueItemStatus::Pending {
            return Ok(false);
        }
        let now = Utc::now();
        item.status = QueueItemStatus::Processing;
        item.started_at = Some(now);
        item.updated_at = now;
        Ok(true)
    }

    async fn mark_completed(&self, id: Uuid) -> StoreResult<()> {
        self.update(id, |item| {
            item.status = QueueItemStatus::Completed;
            item.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> StoreResult<()> {
        let reason = reason.to_string();
        self.update(id, move |item| {
            item.status = QueueItemStatus::Failed;
            item.failure_reason = Some(reason);
            item.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn increment_retry(&self, id: Uuid) -> StoreResult<()> {
        self.update(id, |item| {
            item.retry_count += 1;
            item.status = QueueItemStatus::Pending;
            item.started_at = None;
        })
        .await
    }

    async fn release(&self, id: Uuid) -> StoreResult<()> {
        self.update(id, |item| {
            if item.status == QueueItemStatus::Processing {
                item.status = QueueItemStatus::Pending;
                item.started_at = None;
            }
        })
        .await
    }

    async fn requeue_stale(&self, older_than: Duration) -> StoreResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut items = self.items.write().await;
        let mut released = 0;
        for item in items.values_mut() {
            let stale = item.status == QueueItemStatus::Processing
                && item.started_at.map_or(true, |at| at <= cutoff);
            if stale {
                item.status = QueueItemStatus::Pending;
                item.started_at = None;
                item.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn metrics(&self) -> StoreResult<QueueMetrics> {
        let now = Utc::now();
        let items = self.items.read().await;
        let mut metrics = QueueMetrics::default();
        let mut total_ms = 0f64;
        let mut timed = 0u64;

        for item in items.values() {
            match item.status {
                QueueItemStatus::Pending => {
                    metrics.pending_count += 1;
                    let age = (now - item.created_at).to_std().unwrap_or_default();
                    metrics.oldest_pending_age = metrics.oldest_pending_age.max(age);
                }
                QueueItemStatus::Processing => metrics.processing_count += 1,
                QueueItemStatus::Completed => {
                    metrics.completed_count += 1;
                    if let (Some(started), Some(done)) = (item.started_at, item.completed_at) {
                        total_ms += (done - started).num_milliseconds().max(0) as f64;
                        timed += 1;
                    }
                }
                QueueItemStatus::Failed => metrics.failed_count += 1,
            }
        }

        if timed > 0 {
            metrics.avg_processing_ms = total_ms / timed as f64;
        }
        Ok(metrics)
    }
}
