//! Queue items
//!
//! A queue item asks the engine to apply one operation to one transaction.
//! Items are never deleted; terminal items stay behind for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::error::DomainError;

/// Base delay for retry backoff
pub const BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// Operation a queue item applies to its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOperation {
    /// Pending -> Completed, writes balance_after
    Process,
    /// Completed -> Reversed, restores balance_before
    Reverse,
}

impl QueueOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Process => "process",
            QueueOperation::Reverse => "reverse",
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOperation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" => Ok(QueueOperation::Process),
            "reverse" => Ok(QueueOperation::Reverse),
            other => Err(DomainError::unknown("queue operation", other)),
        }
    }
}

/// Queue item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Processing => "processing",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueItemStatus::Completed | QueueItemStatus::Failed)
    }
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueItemStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueItemStatus::Pending),
            "processing" => Ok(QueueItemStatus::Processing),
            "completed" => Ok(QueueItemStatus::Completed),
            "failed" => Ok(QueueItemStatus::Failed),
            other => Err(DomainError::unknown("queue item status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub operation: QueueOperation,
    /// Higher runs first
    pub priority: i32,
    pub status: QueueItemStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub scheduled_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(
        transaction_id: Uuid,
        operation: QueueOperation,
        priority: i32,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            operation,
            priority,
            status: QueueItemStatus::Pending,
            retry_count: 0,
            max_retries,
            scheduled_at: now,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Delay hint before the next attempt: 2^retry_count seconds
    pub fn backoff(&self) -> Duration {
        backoff_for(self.retry_count)
    }
}

/// `2^retry_count × 1000ms`, saturating instead of overflowing
pub fn backoff_for(retry_count: u32) -> Duration {
    let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
    BACKOFF_BASE.saturating_mul(factor)
}

/// Aggregate view of the queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub pending_count: u64,
    pub processing_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    /// Mean claim-to-completion time of completed items
    pub avg_processing_ms: f64,
    /// Age of the oldest pending item, zero when none are pending
    #[serde(with = "duration_ms")]
    pub oldest_pending_age: Duration,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_for(0), Duration::from_millis(1000));
        assert_eq!(backoff_for(1), Duration::from_millis(2000));
        assert_eq!(backoff_for(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_saturates() {
        assert_eq!(backoff_for(40), BACKOFF_BASE.saturating_mul(u32::MAX));
    }

    #[test]
    fn test_new_item_defaults() {
        let item = QueueItem::new(Uuid::new_v4(), QueueOperation::Reverse, 5, 3);
        assert_eq!(item.status, QueueItemStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert!(!item.retries_exhausted());
        assert!(item.failure_reason.is_none());
    }

    #[test]
    fn test_retries_exhausted_at_max() {
        let mut item = QueueItem::new(Uuid::new_v4(), QueueOperation::Process, 0, 2);
        item.retry_count = 2;
        assert!(item.retries_exhausted());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(QueueItemStatus::Completed.is_terminal());
        assert!(QueueItemStatus::Failed.is_terminal());
        assert!(!QueueItemStatus::Processing.is_terminal());
        assert_eq!("processing".parse::<QueueItemStatus>().unwrap(), QueueItemStatus::Processing);
    }

    #[test]
    fn test_metrics_serialize_age_in_millis() {
        let metrics = QueueMetrics {
            pending_count: 2,
            oldest_pending_age: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["oldest_pending_age"], 1500);
        assert_eq!(json["pending_count"], 2);
    }
}
