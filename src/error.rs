//! Crate-wide error taxonomy.
//!
//! Each component defines its own error enum; [`ErrorKind`] classifies
//! them so callers can decide between retrying, degrading, and surfacing
//! the fault to the user.

use thiserror::Error;

use crate::config::ConfigError;
use crate::link::LinkError;
use crate::location::SensorError;
use crate::navigation::LockError;

/// Classification shared by every error in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Sensor access refused; terminal for that sensor until re-granted.
    PermissionDenied,
    /// Capability absent on this runtime; permanent degrade, no retry.
    Unavailable,
    /// An attempt exceeded its time budget; retryable.
    Timeout,
    /// Malformed or unexpected payload; dropped, never propagated.
    Protocol,
    /// Fault in the underlying transport or sensor source; retryable per policy.
    Link,
}

impl ErrorKind {
    /// Returns true if repeating the failed operation may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Link)
    }
}

/// Any error produced by the crate.
#[derive(Debug, Error)]
pub enum CompassError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Direct or relay link failure.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Local sensor failure.
    #[error(transparent)]
    Sensor(#[from] SensorError),

    /// Target lock refused.
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl CompassError {
    /// Classifies the wrapped error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Unavailable,
            Self::Link(e) => e.kind(),
            Self::Sensor(e) => e.kind(),
            Self::Lock(e) => e.kind(),
        }
    }
}

/// Result type alias for composed operations.
pub type Result<T> = std::result::Result<T, CompassError>;
