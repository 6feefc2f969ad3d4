//! Balance application
//!
//! Writes a transaction's precomputed balance to its account. The value
//! written is absolute, so repeating the write after a failed attempt
//! lands on the same balance.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::audit::{AuditAction, AuditLogBuilder, AuditSink};
use crate::domain::{QueueOperation, Transaction, TransactionType};
use crate::store::AccountStore;

use super::ProcessingError;

pub(crate) struct BalanceWriter {
    accounts: Arc<dyn AccountStore>,
    audit: Arc<dyn AuditSink>,
}

impl BalanceWriter {
    pub(crate) fn new(accounts: Arc<dyn AccountStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { accounts, audit }
    }

    /// `balance_after` for Process, `balance_before` for Reverse
    pub(crate) async fn apply(
        &self,
        transaction: &Transaction,
        operation: QueueOperation,
    ) -> Result<Decimal, ProcessingError> {
        let (target, operation_type) = match operation {
            QueueOperation::Process => (transaction.balance_after, transaction.transaction_type),
            QueueOperation::Reverse => (
                transaction.balance_before,
                opposite(transaction.transaction_type),
            ),
        };

        let account = self.accounts.get_by_id(transaction.account_id).await?;
        self.accounts
            .update_balance(account.id, target, operation_type)
            .await?;

        tracing::debug!(
            transaction_id = %transaction.id,
            account_id = %account.id,
            before = %account.balance,
            after = %target,
            "Account balance updated"
        );

        self.audit.emit(
            AuditLogBuilder::new(AuditAction::BalanceUpdated)
                .resource_type("Account")
                .resource_id(account.id)
                .before_state(&serde_json::json!({ "balance": account.balance }))
                .after_state(&serde_json::json!({ "balance": target }))
                .details(serde_json::json!({
                    "transaction_id": transaction.id,
                    "operation": operation.as_str(),
                })),
        );

        Ok(target)
    }
}

fn opposite(transaction_type: TransactionType) -> TransactionType {
    match transaction_type {
        TransactionType::Credit => TransactionType::Debit,
        TransactionType::Debit => TransactionType::Credit,
    }
}
