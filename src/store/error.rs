//! Store Errors
//!
//! Error types shared by every store implementation.

use uuid::Uuid;

use crate::domain::DomainError;

/// Errors that can occur in a store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency conflict
    #[error("Version conflict for transaction {id}: expected version {expected}, found {actual}")]
    VersionConflict { id: Uuid, expected: i64, actual: i64 },

    /// Record not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Record already exists
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: Uuid },

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored row could not be mapped back into a domain value
    #[error("Corrupt record: {0}")]
    Corrupt(#[from] DomainError),
}

impl StoreError {
    pub fn transaction_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Transaction",
            id,
        }
    }

    pub fn account_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Account",
            id,
        }
    }

    pub fn queue_item_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Queue item",
            id,
        }
    }

    /// Check if this error is a version conflict
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        let conflict = StoreError::VersionConflict {
            id: Uuid::nil(),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_version_conflict());
        assert!(!conflict.is_not_found());

        let missing = StoreError::transaction_not_found(Uuid::nil());
        assert!(missing.is_not_found());
        assert!(missing.to_string().starts_with("Transaction not found"));
    }
}
