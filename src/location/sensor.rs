//! Capability acquisition and state tracking for the local sensors.
//!
//! The platform layer asks the user for sensor access and reports the
//! outcome as a [`Capability`]. Readings are then pushed into the
//! [`SensorHub`], which publishes every change as a [`LocalFix`] on a
//! `watch` channel.

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::{SensorError, SensorKind};
use super::types::{Coordinates, LocalFix};

/// Outcome of asking the platform for access to a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Access granted; readings may follow.
    Granted,
    /// The user refused access.
    Denied,
    /// The runtime has no such sensor.
    Unavailable,
}

/// Lifecycle of a single sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorStatus {
    /// No reading yet, or the last reading was lost.
    #[default]
    Inactive,
    /// Readings are flowing.
    Active,
    /// Access refused; terminal until re-granted.
    PermissionDenied,
    /// Capability absent; permanent.
    Unavailable,
}

/// Status plus the last captured error for one sensor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorState {
    /// Current lifecycle state.
    pub status: SensorStatus,
    /// Last error, cleared by the next good reading.
    pub error: Option<SensorError>,
}

impl SensorState {
    const fn accepts_readings(&self) -> bool {
        matches!(self.status, SensorStatus::Inactive | SensorStatus::Active)
    }
}

/// Reasons a position request can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionErrorKind {
    /// The user refused location access.
    PermissionDenied,
    /// No position could be determined.
    PositionUnavailable,
    /// The position request exceeded its budget.
    Timeout,
}

/// Collects heading and location readings into a published [`LocalFix`].
#[derive(Debug)]
pub struct SensorHub {
    fix: watch::Sender<LocalFix>,
    heading: Mutex<SensorState>,
    location: Mutex<SensorState>,
}

impl Default for SensorHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorHub {
    /// Creates a hub with both sensors inactive and an empty fix.
    #[must_use]
    pub fn new() -> Self {
        let (fix, _) = watch::channel(LocalFix::default());
        Self {
            fix,
            heading: Mutex::new(SensorState::default()),
            location: Mutex::new(SensorState::default()),
        }
    }

    /// Subscribes to fix updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LocalFix> {
        self.fix.subscribe()
    }

    /// Returns the latest fix.
    #[must_use]
    pub fn fix(&self) -> LocalFix {
        *self.fix.borrow()
    }

    /// Returns the heading sensor state.
    #[must_use]
    pub fn heading_state(&self) -> SensorState {
        self.heading.lock().clone()
    }

    /// Returns the location sensor state.
    #[must_use]
    pub fn location_state(&self) -> SensorState {
        self.location.lock().clone()
    }

    /// Records the outcome of the heading capability request.
    pub fn acquire_heading(&self, capability: Capability) -> SensorStatus {
        let status = Self::apply_capability(&self.heading, SensorKind::Heading, capability);
        if status != SensorStatus::Inactive {
            self.fix.send_modify(|fix| fix.heading = None);
        }
        status
    }

    /// Records the outcome of the location capability request.
    pub fn acquire_location(&self, capability: Capability) -> SensorStatus {
        let status = Self::apply_capability(&self.location, SensorKind::Location, capability);
        if status != SensorStatus::Inactive {
            self.fix.send_modify(|fix| fix.coordinates = None);
        }
        status
    }

    fn apply_capability(
        state: &Mutex<SensorState>,
        kind: SensorKind,
        capability: Capability,
    ) -> SensorStatus {
        let next = match capability {
            Capability::Granted => SensorState::default(),
            Capability::Denied => SensorState {
                status: SensorStatus::PermissionDenied,
                error: Some(SensorError::PermissionDenied(kind)),
            },
            Capability::Unavailable => SensorState {
                status: SensorStatus::Unavailable,
                error: Some(SensorError::Unavailable(kind)),
            },
        };
        let status = next.status;
        *state.lock() = next;

        match capability {
            Capability::Granted => info!(sensor = %kind, "Sensor access granted"),
            Capability::Denied => warn!(sensor = %kind, "Sensor permission denied"),
            Capability::Unavailable => warn!(sensor = %kind, "Sensor unavailable"),
        }
        status
    }

    /// Pushes a raw heading reading in degrees.
    ///
    /// Readings are ignored while the sensor is denied or unavailable.
    pub fn update_heading(&self, raw_heading: f64) {
        if !raw_heading.is_finite() {
            debug!(raw_heading, "Ignoring non-finite heading");
            return;
        }
        {
            let mut state = self.heading.lock();
            if !state.accepts_readings() {
                return;
            }
            *state = SensorState {
                status: SensorStatus::Active,
                error: None,
            };
        }
        let fix = LocalFix::new(Some(raw_heading), None);
        self.fix.send_modify(|current| current.heading = fix.heading);
    }

    /// Pushes a raw position reading.
    ///
    /// Invalid coordinates are dropped and leave the previous fix untouched.
    pub fn update_location(&self, latitude: f64, longitude: f64) {
        let Some(coordinates) = Coordinates::new(latitude, longitude) else {
            warn!(latitude, longitude, "Ignoring invalid position reading");
            return;
        };
        {
            let mut state = self.location.lock();
            if !state.accepts_readings() {
                return;
            }
            *state = SensorState {
                status: SensorStatus::Active,
                error: None,
            };
        }
        self.fix
            .send_modify(|current| current.coordinates = Some(coordinates));
    }

    /// Records a failed position request and clears the current position.
    pub fn location_error(&self, error: PositionErrorKind) {
        let next = match error {
            PositionErrorKind::PermissionDenied => SensorState {
                status: SensorStatus::PermissionDenied,
                error: Some(SensorError::PermissionDenied(SensorKind::Location)),
            },
            PositionErrorKind::PositionUnavailable => SensorState {
                status: SensorStatus::Inactive,
                error: Some(SensorError::ReadingUnavailable(SensorKind::Location)),
            },
            PositionErrorKind::Timeout => SensorState {
                status: SensorStatus::Inactive,
                error: Some(SensorError::Timeout(SensorKind::Location)),
            },
        };
        warn!(?error, "Location request failed");
        *self.location.lock() = next;
        self.fix.send_modify(|fix| fix.coordinates = None);
    }

    /// Marks the heading as lost (e.g. the orientation stream stopped).
    pub fn heading_lost(&self) {
        {
            let mut state = self.heading.lock();
            if state.status == SensorStatus::Active {
                state.status = SensorStatus::Inactive;
            }
        }
        self.fix.send_modify(|fix| fix.heading = None);
    }
}
