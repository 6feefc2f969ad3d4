//! Transaction Engine
//!
//! Public entry points of the queue engine: enqueue, run the worker pool,
//! process one item directly, read queue metrics.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditSink};
use crate::domain::{QueueItem, QueueMetrics, QueueOperation};
use crate::metrics::MetricsSink;
use crate::processor::{ItemProcessor, ProcessingError};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
use crate::scheduler::{QueueScheduler, SchedulerConfig};
use crate::store::{StoreError, Stores};

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

pub struct TransactionEngine {
    stores: Stores,
    processor: Arc<ItemProcessor>,
    scheduler: QueueScheduler,
    breaker: Arc<CircuitBreaker>,
    audit: Arc<dyn AuditSink>,
}

impl TransactionEngine {
    pub fn new(
        stores: Stores,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn MetricsSink>,
        config: EngineConfig,
    ) -> Self {
        let breaker =
            Arc::new(CircuitBreaker::new(config.circuit_breaker).with_audit(audit.clone()));
        let processor = Arc::new(ItemProcessor::new(
            &stores,
            breaker.clone(),
            audit.clone(),
            metrics.clone(),
        ));
        let scheduler = QueueScheduler::new(
            stores.queue.clone(),
            processor.clone(),
            metrics,
            config.scheduler,
        );

        Self {
            stores,
            processor,
            scheduler,
            breaker,
            audit,
        }
    }

    /// Queue an operation on an existing transaction
    pub async fn enqueue_transaction(
        &self,
        transaction_id: Uuid,
        operation: QueueOperation,
        priority: i32,
    ) -> Result<QueueItem, StoreError> {
        self.stores.transactions.get_by_id(transaction_id).await?;
        let item = self
            .stores
            .queue
            .enqueue(transaction_id, operation, priority)
            .await?;

        tracing::info!(
            queue_item_id = %item.id,
            transaction_id = %transaction_id,
            operation = %operation,
            priority,
            "Transaction enqueued"
        );
        self.audit.emit(
            AuditLogBuilder::transaction(AuditAction::ItemEnqueued, transaction_id).details(
                serde_json::json!({
                    "queue_item_id": item.id,
                    "operation": operation.as_str(),
                    "priority": priority,
                }),
            ),
        );

        Ok(item)
    }

    /// Poll and dispatch until `cancel` fires; returns once in-flight work has drained
    pub async fn start_processing(&self, cancel: CancellationToken) {
        self.scheduler.run(cancel).await;
    }

    pub async fn process_queue_item(&self, item: &QueueItem) -> Result<(), ProcessingError> {
        self.processor.process_item(item).await
    }

    pub async fn queue_metrics(&self) -> Result<QueueMetrics, StoreError> {
        self.stores.queue.metrics().await
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn scheduler(&self) -> &QueueScheduler {
        &self.scheduler
    }
}
