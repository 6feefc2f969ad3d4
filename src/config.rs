//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::resilience::CircuitBreakerConfig;
use crate::scheduler::SchedulerConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Admin server host
    pub host: String,

    /// Admin server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Concurrent queue workers
    pub queue_max_workers: usize,

    pub queue_poll_interval: Duration,

    /// Retry budget given to newly enqueued items
    pub queue_max_retries: u32,

    pub circuit_max_failures: u32,

    pub circuit_reset_timeout: Duration,

    pub circuit_half_open_successes: u32,

    /// When set, admin routes require a matching `X-API-Key` header
    pub admin_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let config = Self {
            database_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&lookup, "PORT", 3000)?,
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            queue_max_workers: parse_or(&lookup, "QUEUE_MAX_WORKERS", 10)?,
            queue_poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "QUEUE_POLL_INTERVAL_MS",
                1000,
            )?),
            queue_max_retries: parse_or(&lookup, "QUEUE_MAX_RETRIES", 3)?,
            circuit_max_failures: parse_or(&lookup, "CIRCUIT_MAX_FAILURES", 5)?,
            circuit_reset_timeout: Duration::from_secs(parse_or(
                &lookup,
                "CIRCUIT_RESET_TIMEOUT_SECS",
                30,
            )?),
            circuit_half_open_successes: parse_or(&lookup, "CIRCUIT_HALF_OPEN_SUCCESSES", 2)?,
            admin_api_key: lookup("ADMIN_API_KEY").filter(|key| !key.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_max_connections == 0 {
            return Err(ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"));
        }
        if self.queue_max_workers == 0 {
            return Err(ConfigError::InvalidValue("QUEUE_MAX_WORKERS"));
        }
        if self.queue_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue("QUEUE_POLL_INTERVAL_MS"));
        }
        if self.circuit_max_failures == 0 {
            return Err(ConfigError::InvalidValue("CIRCUIT_MAX_FAILURES"));
        }
        if self.circuit_half_open_successes == 0 {
            return Err(ConfigError::InvalidValue("CIRCUIT_HALF_OPEN_SUCCESSES"));
        }
        Ok(())
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            scheduler: SchedulerConfig {
                max_workers: self.queue_max_workers,
                poll_interval: self.queue_poll_interval,
                ..SchedulerConfig::default()
            },
            circuit_breaker: CircuitBreakerConfig {
                max_failures: self.circuit_max_failures,
                reset_timeout: self.circuit_reset_timeout,
                half_open_max_successes: self.circuit_half_open_successes,
            },
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
