//! PostgreSQL store integration tests
//!
//! Need a migrated database: `DATABASE_URL=... cargo test -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use uuid::Uuid;

use ledger_engine::audit::{AuditAction, PgAuditSink};
use ledger_engine::domain::QueueItemStatus;
use ledger_engine::metrics::InMemoryMetrics;
use ledger_engine::store::{
    AccountStore, PgAccountStore, PgQueueStore, PgTransactionStore, QueueStore, Stores,
    TransactionStore,
};
use ledger_engine::{
    Account, Amount, QueueOperation, Transaction, TransactionEngine, TransactionStatus,
    TransactionType,
};

mod common;

async fn seed(pool: &sqlx::PgPool, reference: &str) -> (Account, Transaction) {
    let accounts = PgAccountStore::new(pool.clone());
    let transactions = PgTransactionStore::new(pool.clone());

    let account = Account::new(Uuid::new_v4(), "USD").with_balance(dec!(100));
    accounts.insert(&account).await.unwrap();
    let tx = Transaction::new_pending(
        &account,
        TransactionType::Credit,
        Amount::new(dec!(15)).unwrap(),
        reference,
    )
    .unwrap();
    transactions.insert(&tx).await.unwrap();
    (account, tx)
}

#[tokio::test]
#[ignore]
async fn test_optimistic_lock_rejects_stale_version() {
    let pool = common::setup_test_db().await;
    let (_, tx) = seed(&pool, "").await;
    let store = PgTransactionStore::new(pool);

    let mut completed = tx.clone();
    completed.complete().unwrap();
    let written = store.update_with_optimistic_lock(&completed, 1).await.unwrap();
    assert_eq!(written.version, 2);

    let err = store
        .update_with_optimistic_lock(&completed, 1)
        .await
        .unwrap_err();
    assert!(err.is_version_conflict());

    let stored = store.get_by_id(tx.id).await.unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.status, TransactionStatus::Completed);
}

#[tokio::test]
#[ignore]
async fn test_reference_lookup_returns_earliest() {
    let pool = common::setup_test_db().await;
    let reference = format!("pg-ref-{}", Uuid::new_v4());
    let (_, first) = seed(&pool, &reference).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (_, _second) = seed(&pool, &reference).await;

    let store = PgTransactionStore::new(pool);
    let found = store.get_by_reference(&reference).await.unwrap().unwrap();
    assert_eq!(found.id, first.id);
    assert!(store.get_by_reference("pg-ref-missing").await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn test_queue_claim_is_exclusive() {
    let pool = common::setup_test_db().await;
    let (_, tx) = seed(&pool, "").await;
    let queue = PgQueueStore::new(pool, 3);

    let item = queue.enqueue(tx.id, QueueOperation::Process, 7).await.unwrap();
    assert!(queue.mark_processing(item.id).await.unwrap());
    assert!(!queue.mark_processing(item.id).await.unwrap());

    queue.increment_retry(item.id).await.unwrap();
    let retried = queue.get_by_id(item.id).await.unwrap();
    assert_eq!(retried.status, QueueItemStatus::Pending);
    assert_eq!(retried.retry_count, 1);

    assert!(queue.mark_processing(item.id).await.unwrap());
    queue.release(item.id).await.unwrap();
    let released = queue.get_by_id(item.id).await.unwrap();
    assert_eq!(released.status, QueueItemStatus::Pending);
    assert_eq!(released.retry_count, 1);

    queue.mark_failed(item.id, "test").await.unwrap();
    let failed = queue.get_by_id(item.id).await.unwrap();
    assert_eq!(failed.status, QueueItemStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("test"));
}

#[tokio::test]
#[ignore]
async fn test_engine_processes_against_postgres() {
    let pool = common::setup_test_db().await;
    let (account, tx) = seed(&pool, "").await;
    let audit = Arc::new(PgAuditSink::new(pool.clone()));
    let engine = TransactionEngine::new(
        Stores::postgres(pool.clone(), 3),
        audit.clone(),
        Arc::new(InMemoryMetrics::new()),
        common::engine_config(2, 5),
    );

    let item = engine
        .enqueue_transaction(tx.id, QueueOperation::Process, 0)
        .await
        .unwrap();
    engine.process_queue_item(&item).await.unwrap();

    let stored = PgTransactionStore::new(pool.clone())
        .get_by_id(tx.id)
        .await
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
    assert_eq!(stored.version, 2);

    let balance = PgAccountStore::new(pool.clone())
        .get_by_id(account.id)
        .await
        .unwrap()
        .balance;
    assert_eq!(balance, dec!(115));

    let queue = PgQueueStore::new(pool, 3);
    assert_eq!(
        queue.get_by_id(item.id).await.unwrap().status,
        QueueItemStatus::Completed
    );

    // Audit writes are fire-and-forget
    tokio::time::sleep(Duration::from_millis(200)).await;
    let trail = audit.get_by_resource(tx.id, 20).await.unwrap();
    assert!(trail
        .iter()
        .any(|entry| entry.action == AuditAction::ProcessingCompleted.as_str()));
}
