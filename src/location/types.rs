//! Location data types.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::geo;

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A validated latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude, -90.0 to 90.0
    pub latitude: f64,
    /// Longitude, -180.0 to 180.0
    pub longitude: f64,
}

impl Coordinates {
    /// Creates coordinates, returning `None` for non-finite or out-of-range input.
    ///
    /// # Examples
    ///
    /// ```
    /// use saferoute_core::location::Coordinates;
    ///
    /// assert!(Coordinates::new(37.7749, -122.4194).is_some());
    /// assert!(Coordinates::new(91.0, 0.0).is_none());
    /// assert!(Coordinates::new(f64::NAN, 0.0).is_none());
    /// ```
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid_lat = latitude.is_finite() && (-90.0..=90.0).contains(&latitude);
        let valid_lon = longitude.is_finite() && (-180.0..=180.0).contains(&longitude);
        (valid_lat && valid_lon).then_some(Self {
            latitude,
            longitude,
        })
    }

    /// Builds coordinates from two optional components.
    #[must_use]
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        Self::new(latitude?, longitude?)
    }

    /// Initial bearing from `self` toward `other`, in `[0, 360)`.
    #[must_use]
    pub fn bearing_to(&self, other: &Self) -> f64 {
        geo::bearing(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Great-circle distance from `self` to `other`, in meters.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        geo::distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// The local device's latest heading and position.
///
/// Missing readings are `None`; they are never substituted with zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocalFix {
    /// Compass heading in `[0, 360)`, if the heading sensor is producing readings.
    pub heading: Option<f64>,
    /// Position, if the location sensor is producing readings.
    pub coordinates: Option<Coordinates>,
}

impl LocalFix {
    /// Creates a fix from optional heading and position.
    #[must_use]
    pub fn new(heading: Option<f64>, coordinates: Option<Coordinates>) -> Self {
        Self {
            heading: heading.filter(|h| h.is_finite()).map(geo::normalize_angle),
            coordinates,
        }
    }

    /// Returns true if both heading and position are known.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.heading.is_some() && self.coordinates.is_some()
    }
}

/// A device's report about itself.
///
/// A newer sample for the same `device_id` replaces the older one wherever
/// samples are stored.
///
/// # Wire format
///
/// ```json
/// {"deviceId":"K3F9QZ2A","heading":90.0,"latitude":1.0,"longitude":2.0,"timestamp":1700000000000}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSample {
    /// Identifier of the reporting device.
    pub device_id: String,

    /// Heading in degrees, `None` if unknown.
    #[serde(default)]
    pub heading: Option<f64>,

    /// Latitude in degrees, `None` if unknown.
    #[serde(default)]
    pub latitude: Option<f64>,

    /// Longitude in degrees, `None` if unknown.
    #[serde(default)]
    pub longitude: Option<f64>,

    /// When the sample was produced (Unix milliseconds).
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
}

impl PeerSample {
    /// Creates a sample describing `fix`, stamped with `timestamp_ms`.
    #[must_use]
    pub fn from_fix(device_id: impl Into<String>, fix: &LocalFix, timestamp_ms: i64) -> Self {
        Self {
            device_id: device_id.into(),
            heading: fix.heading,
            latitude: fix.coordinates.map(|c| c.latitude),
            longitude: fix.coordinates.map(|c| c.longitude),
            timestamp_ms,
        }
    }

    /// Returns the sample's position if both components are present and valid.
    #[must_use]
    pub fn position(&self) -> Option<Coordinates> {
        Coordinates::from_parts(self.latitude, self.longitude)
    }

    /// Returns the sample's heading normalized into `[0, 360)`, if known.
    #[must_use]
    pub fn heading(&self) -> Option<f64> {
        self.heading
            .filter(|h| h.is_finite())
            .map(geo::normalize_angle)
    }

    /// Milliseconds elapsed between the sample timestamp and `now_ms`.
    #[must_use]
    pub const fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }

    /// Parses a sample from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or missing required fields.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes the sample to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (extremely rare).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
