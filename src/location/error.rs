//! Error types for local sensors.

use std::fmt;

use thiserror::Error;

use crate::error::ErrorKind;

/// Which local sensor an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Compass / device orientation.
    Heading,
    /// Satellite or network positioning.
    Location,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heading => f.write_str("heading"),
            Self::Location => f.write_str("location"),
        }
    }
}

/// Errors captured from local sensors.
///
/// These are recorded in [`SensorState`](super::SensorState) rather than
/// returned from steady-state calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    /// The user refused access to the sensor.
    #[error("{0} permission denied")]
    PermissionDenied(SensorKind),

    /// The runtime has no such sensor.
    #[error("{0} sensor not available on this device")]
    Unavailable(SensorKind),

    /// The sensor exists but could not produce a reading.
    #[error("{0} reading unavailable")]
    ReadingUnavailable(SensorKind),

    /// The sensor did not produce a reading in time.
    #[error("{0} request timed out")]
    Timeout(SensorKind),
}

impl SensorError {
    /// Classifies the error in the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::ReadingUnavailable(_) => ErrorKind::Link,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }
}
