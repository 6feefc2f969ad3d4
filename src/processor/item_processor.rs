//! Item Processor
//!
//! Applies one queue item to its transaction and account. Each step's
//! failure short-circuits the rest of the pipeline.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditSink};
use crate::domain::{QueueItem, QueueOperation, Transaction, TransactionStatus};
use crate::metrics::{self, MetricsSink};
use crate::resilience::CircuitBreaker;
use crate::store::{QueueStore, Stores, TransactionStore};

use super::balance::BalanceWriter;
use super::ProcessingError;

pub const REASON_MAX_RETRIES: &str = "max retries exceeded";
pub const REASON_DUPLICATE_REFERENCE: &str = "duplicate transaction reference";

pub struct ItemProcessor {
    transactions: Arc<dyn TransactionStore>,
    queue: Arc<dyn QueueStore>,
    balances: BalanceWriter,
    breaker: Arc<CircuitBreaker>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl ItemProcessor {
    pub fn new(
        stores: &Stores,
        breaker: Arc<CircuitBreaker>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            transactions: stores.transactions.clone(),
            queue: stores.queue.clone(),
            balances: BalanceWriter::new(stores.accounts.clone(), audit.clone()),
            breaker,
            audit,
            metrics,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run one item through the pipeline.
    ///
    /// Recoverable failures consume one unit of retry budget and return the
    /// error; the item goes back to Pending. Terminal failures leave the item
    /// Failed, and its transaction too if it was still Pending.
    pub async fn process_item(&self, item: &QueueItem) -> Result<(), ProcessingError> {
        let started = Instant::now();

        if self.breaker.is_open() {
            debug!(queue_item_id = %item.id, "Circuit open, skipping item");
            self.count(item.operation, ProcessingError::CircuitOpen.outcome());
            return Err(ProcessingError::CircuitOpen);
        }

        if item.retries_exhausted() {
            return Err(self.exhaust(item).await);
        }

        match self.attempt(item).await {
            Ok(updated) => self.complete(item, &updated, started).await,
            Err(err @ ProcessingError::DuplicateReference { .. }) => {
                self.count(item.operation, err.outcome());
                Err(err)
            }
            Err(err) => self.recover(item, err).await,
        }
    }

    async fn attempt(&self, item: &QueueItem) -> Result<Transaction, ProcessingError> {
        let transaction = self.transactions.get_by_id(item.transaction_id).await?;

        self.audit.emit(
            AuditLogBuilder::transaction(AuditAction::ProcessingStarted, transaction.id)
                .before_state(&transaction)
                .details(serde_json::json!({
                    "queue_item_id": item.id,
                    "operation": item.operation.as_str(),
                    "retry_count": item.retry_count,
                })),
        );

        if transaction.has_reference() {
            if let Some(existing) = self
                .transactions
                .get_by_reference(&transaction.reference)
                .await?
            {
                if existing.id != transaction.id {
                    return Err(self.reject_duplicate(item, transaction, existing.id).await);
                }
            }
        }

        let expected_version = transaction.version;
        let mut next = transaction.clone();
        match item.operation {
            QueueOperation::Process => next.complete()?,
            QueueOperation::Reverse => next.reverse()?,
        }

        self.balances.apply(&next, item.operation).await?;

        match self
            .transactions
            .update_with_optimistic_lock(&next, expected_version)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(e) if e.is_version_conflict() => {
                warn!(
                    transaction_id = %transaction.id,
                    expected_version,
                    error = %e,
                    "Optimistic lock conflict"
                );
                self.audit.emit(
                    AuditLogBuilder::transaction(AuditAction::LockConflict, transaction.id)
                        .details(serde_json::json!({
                            "queue_item_id": item.id,
                            "expected_version": expected_version,
                        })),
                );
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn complete(
        &self,
        item: &QueueItem,
        updated: &Transaction,
        started: Instant,
    ) -> Result<(), ProcessingError> {
        // Ledger write succeeded; queue bookkeeping errors do not trip the breaker
        self.breaker.record_success();
        let marked = self.queue.mark_completed(item.id).await;

        let operation = item.operation.as_str();
        self.metrics.record_duration(
            metrics::ITEM_DURATION_MS,
            started.elapsed(),
            &[("operation", operation)],
        );
        self.count(item.operation, "success");

        self.audit.emit(
            AuditLogBuilder::transaction(AuditAction::ProcessingCompleted, updated.id)
                .after_state(updated)
                .details(serde_json::json!({
                    "queue_item_id": item.id,
                    "operation": operation,
                    "duration_ms": started.elapsed().as_millis() as u64,
                    "queue_item_marked": marked.is_ok(),
                })),
        );

        if let Err(e) = marked {
            // Left claimed; the scheduler's stale sweep hands it back
            error!(
                queue_item_id = %item.id,
                transaction_id = %updated.id,
                error = %e,
                "Transaction applied but queue item could not be marked completed"
            );
            return Err(e.into());
        }

        info!(
            queue_item_id = %item.id,
            transaction_id = %updated.id,
            operation,
            version = updated.version,
            status = %updated.status,
            "Queue item processed"
        );
        Ok(())
    }

    /// Recoverable failure: spend one retry, or exhaust the item if none remain
    async fn recover(&self, item: &QueueItem, err: ProcessingError) -> Result<(), ProcessingError> {
        self.breaker.record_failure();
        self.count(item.operation, err.outcome());

        if item.retries_exhausted() {
            return Err(self.exhaust(item).await);
        }

        let backoff = item.backoff();
        if let Err(e) = self.queue.increment_retry(item.id).await {
            error!(queue_item_id = %item.id, error = %e, "Failed to schedule retry");
            if let Err(e) = self.queue.release(item.id).await {
                error!(queue_item_id = %item.id, error = %e, "Failed to release queue item");
            }
            return Err(err);
        }

        self.metrics
            .increment_counter(metrics::RETRIES, &[("operation", item.operation.as_str())]);
        self.audit.emit(
            AuditLogBuilder::transaction(AuditAction::RetryScheduled, item.transaction_id)
                .details(serde_json::json!({
                    "queue_item_id": item.id,
                    "retry_count": item.retry_count + 1,
                    "max_retries": item.max_retries,
                    "backoff_ms": backoff.as_millis() as u64,
                    "error": err.to_string(),
                })),
        );

        warn!(
            queue_item_id = %item.id,
            transaction_id = %item.transaction_id,
            retry_count = item.retry_count + 1,
            max_retries = item.max_retries,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Processing failed, retry scheduled"
        );
        Err(err)
    }

    async fn exhaust(&self, item: &QueueItem) -> ProcessingError {
        let err = ProcessingError::MaxRetriesExceeded {
            item_id: item.id,
            retry_count: item.retry_count,
            max_retries: item.max_retries,
        };

        error!(
            queue_item_id = %item.id,
            transaction_id = %item.transaction_id,
            retry_count = item.retry_count,
            "Retry budget exhausted"
        );

        self.fail_transaction(item).await;
        self.fail_item(item, REASON_MAX_RETRIES, &err);
        if let Err(e) = self.queue.mark_failed(item.id, REASON_MAX_RETRIES).await {
            error!(queue_item_id = %item.id, error = %e, "Failed to mark queue item failed");
        }
        self.count(item.operation, err.outcome());
        err
    }

    async fn reject_duplicate(
        &self,
        item: &QueueItem,
        transaction: Transaction,
        existing_id: Uuid,
    ) -> ProcessingError {
        let err = ProcessingError::DuplicateReference {
            reference: transaction.reference.clone(),
            existing_id,
        };

        warn!(
            transaction_id = %transaction.id,
            existing_id = %existing_id,
            reference = %transaction.reference,
            "Duplicate transaction reference"
        );
        self.audit.emit(
            AuditLogBuilder::transaction(AuditAction::DuplicateReference, transaction.id)
                .details(serde_json::json!({
                    "reference": transaction.reference,
                    "existing_transaction_id": existing_id,
                })),
        );

        self.persist_failed(item, transaction).await;
        self.fail_item(item, REASON_DUPLICATE_REFERENCE, &err);
        if let Err(e) = self.queue.mark_failed(item.id, REASON_DUPLICATE_REFERENCE).await {
            error!(queue_item_id = %item.id, error = %e, "Failed to mark queue item failed");
        }
        err
    }

    fn fail_item(&self, item: &QueueItem, reason: &str, err: &ProcessingError) {
        self.audit.emit(
            AuditLogBuilder::transaction(AuditAction::ProcessingFailed, item.transaction_id)
                .details(serde_json::json!({
                    "queue_item_id": item.id,
                    "reason": reason,
                    "error": err.to_string(),
                    "retry_count": item.retry_count,
                })),
        );
    }

    async fn fail_transaction(&self, item: &QueueItem) {
        match self.transactions.get_by_id(item.transaction_id).await {
            Ok(transaction) => self.persist_failed(item, transaction).await,
            Err(e) => {
                error!(transaction_id = %item.transaction_id, error = %e, "Could not load transaction to fail it")
            }
        }
    }

    /// Best effort: the queue item is failed regardless of the outcome here.
    /// Only a Pending transaction is failed; one whose balance effect is
    /// already applied keeps its status.
    async fn persist_failed(&self, item: &QueueItem, transaction: Transaction) {
        match transaction.status {
            TransactionStatus::Pending => {}
            TransactionStatus::Failed => return,
            TransactionStatus::Completed | TransactionStatus::Reversed => {
                warn!(
                    transaction_id = %transaction.id,
                    queue_item_id = %item.id,
                    status = %transaction.status,
                    "Transaction already applied, failing the queue item only"
                );
                self.audit.emit(
                    AuditLogBuilder::transaction(AuditAction::TransactionLeftUnchanged, transaction.id)
                        .before_state(&transaction)
                        .details(serde_json::json!({
                            "queue_item_id": item.id,
                            "operation": item.operation.as_str(),
                            "status": transaction.status.as_str(),
                        })),
                );
                return;
            }
        }

        let expected_version = transaction.version;
        let mut failed = transaction;
        if let Err(e) = failed.fail() {
            error!(transaction_id = %failed.id, error = %e, "Transaction cannot be failed");
            return;
        }

        if let Err(e) = self
            .transactions
            .update_with_optimistic_lock(&failed, expected_version)
            .await
        {
            error!(transaction_id = %failed.id, error = %e, "Failed to persist failed transaction");
        }
    }

    fn count(&self, operation: QueueOperation, outcome: &str) {
        self.metrics.increment_counter(
            metrics::ITEMS_PROCESSED,
            &[("operation", operation.as_str()), ("outcome", outcome)],
        );
    }
}
