//! Navigation and target-lock types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::DirectionHint;
use crate::location::Coordinates;

/// Age classification of a peer's last reported position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Younger than the freshness window.
    Fresh,
    /// At least as old as the freshness window.
    Stale,
    /// No update has ever arrived.
    #[default]
    Unknown,
}

impl Freshness {
    /// Classifies an update that is `age_ms` old.
    ///
    /// Negative ages (clock skew) count as fresh.
    #[must_use]
    pub const fn classify(age_ms: Option<i64>, window_ms: u64) -> Self {
        match age_ms {
            None => Self::Unknown,
            Some(age) if age < 0 => Self::Fresh,
            Some(age) if age.unsigned_abs() < window_ms => Self::Fresh,
            Some(_) => Self::Stale,
        }
    }

    /// Classifies an update made at `last_update`, observed at `now`.
    #[must_use]
    pub fn since(last_update: Option<DateTime<Utc>>, now: DateTime<Utc>, window_ms: u64) -> Self {
        Self::classify(
            last_update.map(|at| (now - at).num_milliseconds()),
            window_ms,
        )
    }
}

/// Bearing and distance between two positions. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BearingResult {
    /// Initial bearing in `[0, 360)`.
    pub bearing_deg: f64,
    /// Great-circle distance in metres.
    pub distance_meters: f64,
}

impl BearingResult {
    /// Computes the bearing and distance from `from` to `to`.
    #[must_use]
    pub fn between(from: &Coordinates, to: &Coordinates) -> Self {
        Self {
            bearing_deg: from.bearing_to(to),
            distance_meters: from.distance_to(to),
        }
    }
}

/// One evaluation of the navigation controller.
///
/// Every derived field is `None` unless the local heading, the local
/// position, and the target's position are all known.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationReadout {
    /// Selected target.
    pub target_id: Option<String>,
    /// Whether the target currently has a sample available.
    pub target_connected: bool,
    /// Bearing and distance to the target.
    pub bearing: Option<BearingResult>,
    /// Bearing relative to the local heading, in `(-180, 180]`.
    pub relative_bearing_deg: Option<f64>,
    /// Which way to turn.
    pub hint: Option<DirectionHint>,
    /// Whether both devices face each other. Needs the target's heading.
    pub mutual_facing: Option<bool>,
    /// Human-readable distance.
    pub distance_text: Option<String>,
    /// 16-point compass name of the bearing.
    pub compass_point: Option<&'static str>,
    /// Age classification of the target's sample.
    pub freshness: Freshness,
}

/// A person record supplied by the tracked-person directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedPerson {
    /// Directory identifier.
    pub unique_id: String,
    /// Display name.
    pub name: String,
    /// Last known position.
    pub last_known_location: Option<Coordinates>,
    /// When the position was last updated.
    pub last_update: Option<DateTime<Utc>>,
}

/// Read-only access to tracked people.
///
/// The directory is owned elsewhere; the lock controller only reads it.
pub trait PersonDirectory: Send + Sync {
    /// Looks up a person by identifier.
    fn person(&self, unique_id: &str) -> Option<TrackedPerson>;
}

/// An active lock. Replaced on every change, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSession {
    /// Locked person.
    pub target_id: String,
    /// Display name of the locked person.
    pub target_name: String,
    /// When the lock was taken.
    pub locked_at: DateTime<Utc>,
    /// Last update time seen for the target.
    pub last_peer_update: Option<DateTime<Utc>>,
    /// Whether the confirmation signal has been lost.
    pub warning_active: bool,
}

/// One evaluation of the target lock.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockReadout {
    /// Whether a lock is active.
    pub is_locked: bool,
    /// Locked person.
    pub target_id: Option<String>,
    /// Display name of the locked person.
    pub target_name: Option<String>,
    /// Bearing to the target, rounded to whole degrees.
    pub bearing_deg: Option<f64>,
    /// Distance to the target, rounded to whole metres.
    pub distance_m: Option<f64>,
    /// Age classification of the target's last update.
    pub freshness: Freshness,
    /// Last update time of the target.
    pub last_update: Option<DateTime<Utc>>,
    /// Whether the unlock countdown is running.
    pub warning_active: bool,
}
