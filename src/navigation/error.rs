//! Error types for the target lock.

use thiserror::Error;

use crate::error::ErrorKind;

/// Errors returned by [`TargetLockController`](super::TargetLockController).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The connection-confirmation signal is not currently true.
    #[error("Lock requires a confirmed connection")]
    NotConfirmed,

    /// The target identifier is empty.
    #[error("Invalid lock target: {0}")]
    InvalidTarget(String),
}

impl LockError {
    /// Classifies the error in the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConfirmed => ErrorKind::Unavailable,
            Self::InvalidTarget(_) => ErrorKind::Protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_confirmed_display() {
        assert_eq!(
            LockError::NotConfirmed.to_string(),
            "Lock requires a confirmed connection"
        );
        assert_eq!(LockError::NotConfirmed.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn invalid_target_display() {
        let error = LockError::InvalidTarget("empty id".to_string());
        assert_eq!(error.to_string(), "Invalid lock target: empty id");
        assert!(!error.kind().is_retryable());
    }
}
