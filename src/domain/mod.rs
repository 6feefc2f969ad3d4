//! Domain module
//!
//! Core ledger types: accounts, transactions and queue items.

pub mod account;
pub mod amount;
pub mod error;
pub mod queue;
pub mod transaction;

pub use account::Account;
pub use amount::{Amount, AmountError};
pub use error::DomainError;
pub use queue::{backoff_for, QueueItem, QueueItemStatus, QueueMetrics, QueueOperation};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
