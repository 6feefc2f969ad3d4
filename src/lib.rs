//! ledger_engine Library
//!
//! Asynchronous ledger transaction queue engine. Re-exports modules for
//! the binaries and integration tests.

pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
mod error;
pub mod metrics;
pub mod processor;
pub mod resilience;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use domain::{Account, Amount, AmountError, DomainError, QueueItem, QueueMetrics, QueueOperation};
pub use domain::{Transaction, TransactionStatus, TransactionType};
pub use engine::{EngineConfig, TransactionEngine};
pub use error::{AppError, AppResult, ErrorResponse};
pub use processor::ProcessingError;
