//! Database module
//!
//! Startup checks against the PostgreSQL pool. Tables are created by
//! `migrations/0001_transaction_queue.sql`, not here.

use sqlx::PgPool;

const REQUIRED_TABLES: [&str; 4] = ["accounts", "transactions", "transaction_queue", "audit_logs"];

pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Required tables absent from the `public` schema
pub async fn missing_tables(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let present: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT table_name::TEXT
        FROM information_schema.tables
        WHERE table_schema = 'public' AND table_name = ANY($1)
        "#,
    )
    .bind(&REQUIRED_TABLES[..])
    .fetch_all(pool)
    .await?;

    Ok(REQUIRED_TABLES
        .iter()
        .filter(|table| !present.iter().any(|p| p == *table))
        .map(|table| table.to_string())
        .collect())
}

/// True when every table the engine reads and writes exists
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let missing = missing_tables(pool).await?;
    if !missing.is_empty() {
        tracing::error!(?missing, "Required tables do not exist");
    }
    Ok(missing.is_empty())
}
