//! Queue load tool
//!
//! Run with: cargo run --bin queue_load --release -- --items 5000 --workers 16
//!
//! Seeds credit transactions, enqueues them and lets the worker pool drain
//! the queue. Uses in-memory stores unless `--postgres` is given, in which
//! case DATABASE_URL must point at a migrated database.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ledger_engine::audit::TracingAuditSink;
use ledger_engine::metrics::{self, InMemoryMetrics};
use ledger_engine::resilience::CircuitBreakerConfig;
use ledger_engine::scheduler::SchedulerConfig;
use ledger_engine::store::{InMemoryAccountStore, InMemoryQueueStore, InMemoryTransactionStore, Stores};
use ledger_engine::{Account, Amount, EngineConfig, QueueOperation, Transaction, TransactionEngine, TransactionType};

fn arg<T: std::str::FromStr>(args: &[String], name: &str, default: T) -> T {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let item_count: usize = arg(&args, "--items", 1000);
    let workers: usize = arg(&args, "--workers", 10);
    let account_count: usize = arg(&args, "--accounts", 100).max(1);
    let use_postgres = args.iter().any(|a| a == "--postgres");

    let stores = if use_postgres {
        let database_url = std::env::var("DATABASE_URL")?;
        println!("Connecting to database...");
        let pool = PgPoolOptions::new()
            .max_connections(workers as u32 + 2)
            .connect(&database_url)
            .await?;
        Stores::postgres(pool, 3)
    } else {
        Stores::new(
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryQueueStore::new(3)),
        )
    };

    println!(
        "Queue load - {} items, {} workers, {} accounts",
        item_count, workers, account_count
    );

    let metrics = Arc::new(InMemoryMetrics::new());
    let engine = Arc::new(TransactionEngine::new(
        stores.clone(),
        Arc::new(TracingAuditSink),
        metrics.clone(),
        EngineConfig {
            scheduler: SchedulerConfig {
                max_workers: workers.max(1),
                poll_interval: Duration::from_millis(20),
                ..SchedulerConfig::default()
            },
            circuit_breaker: CircuitBreakerConfig::default(),
        },
    ));

    let mut accounts = Vec::with_capacity(account_count);
    for _ in 0..account_count {
        let account = Account::new(Uuid::new_v4(), "USD").with_balance(Decimal::new(1_000, 0));
        stores.accounts.insert(&account).await?;
        accounts.push(account);
    }

    let amount = Amount::new(Decimal::new(125, 2))?;
    for i in 0..item_count {
        let account = &accounts[i % account_count];
        let transaction = Transaction::new_pending(
            account,
            TransactionType::Credit,
            amount,
            format!("load-{}", Uuid::new_v4()),
        )?;
        stores.transactions.insert(&transaction).await?;
        engine
            .enqueue_transaction(transaction.id, QueueOperation::Process, (i % 3) as i32)
            .await?;
    }

    let cancel = CancellationToken::new();
    let runner = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.start_processing(cancel).await })
    };

    let start = Instant::now();
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let queue = engine.queue_metrics().await?;
        if queue.pending_count == 0 && queue.processing_count == 0 {
            break;
        }
    }
    let elapsed = start.elapsed();

    cancel.cancel();
    runner.await?;

    let queue = engine.queue_metrics().await?;
    let durations = metrics.duration(metrics::ITEM_DURATION_MS, &[("operation", "process")]);
    let rate = queue.completed_count as f64 / elapsed.as_secs_f64();

    println!("\n=== Queue Load Results ===");
    println!("Completed: {}", queue.completed_count);
    println!("Failed: {}", queue.failed_count);
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    println!("Rate: {:.0} items/sec", rate);
    println!(
        "Item duration: mean {:.2}ms, max {:.2}ms",
        durations.mean_ms(),
        durations.max_ms
    );

    Ok(())
}
