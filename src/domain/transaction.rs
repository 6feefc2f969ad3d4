//! Ledger transactions
//!
//! A transaction is a single precomputed balance movement on one account.
//! The queue engine only ever moves it forward through its lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::account::Account;
use super::amount::Amount;
use super::error::DomainError;

/// Direction of the balance movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TransactionType::Credit),
            "debit" => Ok(TransactionType::Debit),
            other => Err(DomainError::unknown("transaction type", other)),
        }
    }
}

/// Transaction lifecycle status
///
/// ```text
/// Pending ──► Completed ──► Reversed
///    │
///    └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Reversed => "reversed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "reversed" => Ok(TransactionStatus::Reversed),
            other => Err(DomainError::unknown("transaction status", other)),
        }
    }
}

/// A single balance movement on one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Amount,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub status: TransactionStatus,
    /// Optimistic-lock token, bumped by the store on every successful write
    pub version: i64,
    /// Caller-supplied key identifying the logical operation; empty means none
    pub reference: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a pending transaction against the account's current balance.
    ///
    /// The resulting balance is computed once here; processing later writes
    /// it verbatim.
    pub fn new_pending(
        account: &Account,
        transaction_type: TransactionType,
        amount: Amount,
        reference: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let balance_before = account.balance;
        let balance_after = match transaction_type {
            TransactionType::Credit => amount.credit(balance_before),
            TransactionType::Debit => amount.debit(balance_before).ok_or_else(|| {
                DomainError::insufficient_balance(amount.value(), balance_before)
            })?,
        };

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            account_id: account.id,
            transaction_type,
            amount,
            balance_before,
            balance_after,
            status: TransactionStatus::Pending,
            version: 1,
            reference: reference.into(),
            description: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Pending -> Completed
    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.transition(TransactionStatus::Pending, TransactionStatus::Completed)
    }

    /// Completed -> Reversed
    pub fn reverse(&mut self) -> Result<(), DomainError> {
        self.transition(TransactionStatus::Completed, TransactionStatus::Reversed)
    }

    /// Pending -> Failed. Already-failed is a no-op.
    ///
    /// A Completed transaction has moved money and only leaves through
    /// `reverse`.
    pub fn fail(&mut self) -> Result<(), DomainError> {
        match self.status {
            TransactionStatus::Failed => Ok(()),
            TransactionStatus::Pending => {
                self.status = TransactionStatus::Failed;
                self.updated_at = Utc::now();
                Ok(())
            }
            TransactionStatus::Completed | TransactionStatus::Reversed => {
                Err(self.invalid(TransactionStatus::Failed))
            }
        }
    }

    pub fn has_reference(&self) -> bool {
        !self.reference.trim().is_empty()
    }

    fn transition(
        &mut self,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(self.invalid(next));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn invalid(&self, to: TransactionStatus) -> DomainError {
        DomainError::InvalidTransition {
            transaction_id: self.id,
            from: self.status,
            to,
        }
    }
}
