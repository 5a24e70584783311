//! Store error types.
//!
//! Every `ChatStore` operation returns these. An empty room or a user with
//! nothing unread is a successful empty result, never an error.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors returned by store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Storage backend failed (I/O, serialization)
    ///
    /// The operation had no effect. Callers may retry; the store never
    /// retries on its own.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// The operation's context was cancelled before it took effect
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's deadline passed before it took effect
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Subscriber registry unavailable, so delivery could not be set up
    #[error("subscriber registry error: {0}")]
    Registry(String),

    /// A blocking storage task failed to complete
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether this error came from cancellation or a deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::from(StorageError::Io("disk full".to_string()));
        assert_eq!(err.to_string(), "storage failure: I/O error: disk full");

        assert_eq!(StoreError::Cancelled.to_string(), "operation cancelled");
        assert_eq!(
            StoreError::Registry("lock poisoned".into()).to_string(),
            "subscriber registry error: lock poisoned"
        );
    }

    #[test]
    fn cancellation_classification() {
        assert!(StoreError::Cancelled.is_cancellation());
        assert!(StoreError::DeadlineExceeded.is_cancellation());
        assert!(!StoreError::Internal("x".into()).is_cancellation());
    }
}
