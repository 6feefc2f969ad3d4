//! ledger_engine - transaction queue worker with an admin API
//!
//! Consumes the PostgreSQL transaction queue with a bounded worker pool and
//! serves queue/circuit-breaker introspection over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledger_engine::api::{self, AppState};
use ledger_engine::audit::PgAuditSink;
use ledger_engine::metrics::InMemoryMetrics;
use ledger_engine::store::Stores;
use ledger_engine::{db, Config, TransactionEngine};

/// Initialize tracing/logging
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ledger_engine=debug,tower_http=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting ledger engine");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }
    tracing::info!("Database connected successfully");

    let metrics = Arc::new(InMemoryMetrics::new());
    let engine = Arc::new(TransactionEngine::new(
        Stores::postgres(pool.clone(), config.queue_max_retries),
        Arc::new(PgAuditSink::new(pool.clone())),
        metrics.clone(),
        config.engine(),
    ));

    let cancel = CancellationToken::new();
    let worker = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.start_processing(cancel).await })
    };

    let state = AppState::new(engine, metrics).with_api_key(config.admin_api_key.clone());
    let app = api::build_router(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Server is down; make sure the workers stop too, then wait for the drain
    cancel.cancel();
    tracing::info!("Waiting for in-flight queue items...");
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Queue worker task failed");
    }

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels the queue workers
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }

    cancel.cancel();
}
