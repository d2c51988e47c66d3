//! Error types for the herald-store crate.

use herald_common::EmailBatch;
use thiserror::Error;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this id exists.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record with this id already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// JSON columns could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be turned back into a record.
    #[error("Corrupted record: {0}")]
    Corrupted(String),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub(crate) fn email_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "Email",
            id: id.to_string(),
        }
    }

    pub(crate) fn batch_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "Batch",
            id: id.to_string(),
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

/// A guarded batch transition did not apply.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The batch was not in a status the transition may start from.
    #[error("Batch {} is {}, transition not applied", current.id, current.status)]
    Conflict { current: Box<EmailBatch> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransitionError {
    /// The record that caused a conflict, if this is one
    #[must_use]
    pub fn current(&self) -> Option<&EmailBatch> {
        match self {
            Self::Conflict { current } => Some(current),
            Self::Store(_) => None,
        }
    }
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use herald_common::{DeliveryMode, EmailId};

    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = StoreError::email_not_found("01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Email not found: 01ARZ3NDEKTSV4RRFFQ69G5FAV");
    }

    #[test]
    fn test_conflict_carries_record() {
        let batch = EmailBatch::new(EmailId::generate(), vec![], DeliveryMode::Bcc);
        let id = batch.id;
        let err = TransitionError::Conflict {
            current: Box::new(batch),
        };

        assert_eq!(err.current().map(|b| b.id), Some(id));
        assert!(err.to_string().contains("PENDING"));
    }
}
