//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::amount::AmountError;
use super::transaction::TransactionStatus;

/// Business rule violations raised while building or mutating ledger records.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Debit would take the account below zero
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    /// Invalid amount (zero, negative, or exceeds limit)
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    /// Status transition not permitted by the transaction lifecycle
    #[error("Transaction {transaction_id} cannot move from {from} to {to}")]
    InvalidTransition {
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Unknown enum value read from storage or a request
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

impl DomainError {
    /// Create an insufficient balance error
    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance { required, available }
    }

    pub(crate) fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.into(),
        }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance { .. } | Self::InvalidAmount(_) | Self::UnknownVariant { .. }
        )
    }
}
