use crate::domain::collection::CollectionStatus;
use chrono::NaiveDate;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SagaError>;

/// What a message consumer does with a delivery whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Drop the message: retrying cannot change the outcome and nothing is lost.
    Ack,
    /// Hand the message back to the broker for a bounded, delayed redelivery.
    Requeue,
    /// Park the message for an operator.
    DeadLetter,
}

#[derive(Error, Debug)]
pub enum SagaError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unknown category: {0}")]
    UnknownCategory(String),
    #[error("Staged collection for user {0} is missing or expired")]
    StagedMissing(String),
    #[error("Collector {collector_id} has no capacity left on {date}")]
    CapacityExceeded {
        collector_id: String,
        date: NaiveDate,
    },
    #[error("Collection {0} not found")]
    CollectionNotFound(String),
    #[error("Collector {0} not found")]
    CollectorNotFound(String),
    #[error("Payment {0} not found")]
    PaymentNotFound(String),
    #[error("Collection {collection_id} cannot move from {from} to {to}")]
    InvalidTransition {
        collection_id: String,
        from: CollectionStatus,
        to: CollectionStatus,
    },
    #[error("Payment {payment_id} is not settled (status: {status})")]
    PaymentNotSettled { payment_id: String, status: String },
    #[error("Malformed message on {queue}: {reason}")]
    MalformedMessage { queue: String, reason: String },
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Compensation failed: {0}")]
    Compensation(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for SagaError {
    fn from(err: rocksdb::Error) -> Self {
        SagaError::Storage(err.to_string())
    }
}

impl SagaError {
    /// True when a synchronous caller made a bad request (4xx), false for
    /// failures on our side (5xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SagaError::Validation(_)
                | SagaError::UnknownCategory(_)
                | SagaError::StagedMissing(_)
                | SagaError::CollectionNotFound(_)
                | SagaError::CollectorNotFound(_)
                | SagaError::PaymentNotFound(_)
                | SagaError::InvalidTransition { .. }
                | SagaError::PaymentNotSettled { .. }
                | SagaError::MalformedMessage { .. }
        )
    }

    /// Capacity shortfalls are deferred outcomes, not failures.
    pub fn is_capacity(&self) -> bool {
        matches!(self, SagaError::CapacityExceeded { .. })
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            SagaError::CapacityExceeded { .. } | SagaError::InvalidTransition { .. } => {
                Disposition::Ack
            }
            SagaError::Unavailable(_)
            | SagaError::Compensation(_)
            | SagaError::Storage(_)
            | SagaError::Io(_) => Disposition::Requeue,
            SagaError::Validation(_)
            | SagaError::UnknownCategory(_)
            | SagaError::StagedMissing(_)
            | SagaError::CollectionNotFound(_)
            | SagaError::CollectorNotFound(_)
            | SagaError::PaymentNotFound(_)
            | SagaError::PaymentNotSettled { .. }
            | SagaError::MalformedMessage { .. }
            | SagaError::Config(_)
            | SagaError::Csv(_)
            | SagaError::Serialization(_) => Disposition::DeadLetter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_requeued() {
        let err = SagaError::Unavailable("payment service timed out".to_string());
        assert_eq!(err.disposition(), Disposition::Requeue);
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_stale_and_malformed_messages_are_dead_lettered() {
        assert_eq!(
            SagaError::StagedMissing("u1".to_string()).disposition(),
            Disposition::DeadLetter
        );
        let malformed = SagaError::MalformedMessage {
            queue: "payment.completed".to_string(),
            reason: "missing field `paymentId`".to_string(),
        };
        assert_eq!(malformed.disposition(), Disposition::DeadLetter);
    }

    #[test]
    fn test_capacity_is_not_a_failure() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let err = SagaError::CapacityExceeded {
            collector_id: "c1".to_string(),
            date,
        };
        assert!(err.is_capacity());
        assert_eq!(err.disposition(), Disposition::Ack);
    }

    #[test]
    fn test_conflicts_are_client_errors() {
        let err = SagaError::InvalidTransition {
            collection_id: "col-1".to_string(),
            from: CollectionStatus::Completed,
            to: CollectionStatus::Cancelled,
        };
        assert!(err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Collection col-1 cannot move from completed to cancelled"
        );
    }
}
