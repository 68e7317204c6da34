//! Error types for direct and relay links.
//!
//! This module defines errors that can occur while negotiating, opening,
//! and using a link to a remote peer.

use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur during link operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Connection to the relay endpoint failed.
    #[error("Failed to connect to relay {endpoint}: {reason}")]
    Connection {
        /// The endpoint that failed.
        endpoint: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Offer/answer/ICE negotiation failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The underlying transport faulted after connecting.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A payload could not be decoded.
    #[error("Malformed payload: {0}")]
    Protocol(String),

    /// Timeout waiting for operation.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The required capability is missing on this runtime.
    #[error("Link unavailable: {0}")]
    Unavailable(String),

    /// No connection has been started.
    #[error("Link not initialized")]
    NotInitialized,

    /// A connection attempt is already running.
    #[error("Connection already in progress")]
    AlreadyConnecting,

    /// The link is already open.
    #[error("Link already connected")]
    AlreadyConnected,

    /// The link was closed while the operation was running.
    #[error("Link closed")]
    Closed,
}

impl LinkError {
    /// Classifies the error in the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Connection { .. }
            | Self::Negotiation(_)
            | Self::Transport(_)
            | Self::NotInitialized
            | Self::AlreadyConnecting
            | Self::AlreadyConnected
            | Self::Closed => ErrorKind::Link,
        }
    }
}

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
