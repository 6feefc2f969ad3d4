//! Processing Errors
//!
//! Outcome taxonomy of one processing attempt.

use uuid::Uuid;

use crate::domain::DomainError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    /// Breaker is open; the attempt never started
    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Duplicate transaction reference '{reference}' (already used by {existing_id})")]
    DuplicateReference { reference: String, existing_id: Uuid },

    #[error("Optimistic lock conflict on transaction {transaction_id}: expected version {expected}, found {actual}")]
    OptimisticLockConflict {
        transaction_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Max retries exceeded for queue item {item_id} ({retry_count}/{max_retries})")]
    MaxRetriesExceeded {
        item_id: Uuid,
        retry_count: u32,
        max_retries: u32,
    },

    /// Transaction is not in the status the operation starts from
    #[error("Invalid state: {0}")]
    InvalidState(#[from] DomainError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ProcessingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => ProcessingError::NotFound { entity, id },
            StoreError::VersionConflict {
                id,
                expected,
                actual,
            } => ProcessingError::OptimisticLockConflict {
                transaction_id: id,
                expected,
                actual,
            },
            other => ProcessingError::Store(other),
        }
    }
}

impl ProcessingError {
    /// Final for this queue item; both the item and its transaction are Failed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingError::DuplicateReference { .. } | ProcessingError::MaxRetriesExceeded { .. }
        )
    }

    /// Counted against the retry budget
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessingError::NotFound { .. }
                | ProcessingError::OptimisticLockConflict { .. }
                | ProcessingError::InvalidState(_)
                | ProcessingError::Store(_)
        )
    }

    /// Metric label for the attempt outcome
    pub fn outcome(&self) -> &'static str {
        match self {
            ProcessingError::CircuitOpen => "circuit_open",
            ProcessingError::NotFound { .. } => "not_found",
            ProcessingError::DuplicateReference { .. } => "duplicate_reference",
            ProcessingError::OptimisticLockConflict { .. } => "lock_conflict",
            ProcessingError::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            ProcessingError::InvalidState(_) => "invalid_state",
            ProcessingError::Store(_) => "store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_processing_errors() {
        let id = Uuid::new_v4();
        let err: ProcessingError = StoreError::transaction_not_found(id).into();
        assert!(matches!(err, ProcessingError::NotFound { entity: "Transaction", .. }));

        let err: ProcessingError = StoreError::VersionConflict {
            id,
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(
            err,
            ProcessingError::OptimisticLockConflict { expected: 1, actual: 2, .. }
        ));
    }

    #[test]
    fn test_classification() {
        assert!(!ProcessingError::CircuitOpen.is_terminal());
        assert!(!ProcessingError::CircuitOpen.is_retryable());

        let dup = ProcessingError::DuplicateReference {
            reference: "r".into(),
            existing_id: Uuid::new_v4(),
        };
        assert!(dup.is_terminal());
        assert!(!dup.is_retryable());

        let conflict = ProcessingError::OptimisticLockConflict {
            transaction_id: Uuid::new_v4(),
            expected: 3,
            actual: 4,
        };
        assert!(conflict.is_retryable());
        assert_eq!(conflict.outcome(), "lock_conflict");
    }
}
