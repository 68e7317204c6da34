//! Bearing, distance, and angular comparison.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Angular tolerance for [`direction_hint`] to report "facing".
pub const DEFAULT_DIRECTION_TOLERANCE_DEG: f64 = 30.0;

/// Angular tolerance for [`mutual_facing`].
pub const DEFAULT_FACING_TOLERANCE_DEG: f64 = 45.0;

/// Which way the user should turn to face a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectionHint {
    /// The peer lies within tolerance of the current heading.
    FacingEachOther,
    /// The peer lies counter-clockwise of the current heading.
    TurnLeft,
    /// The peer lies clockwise of the current heading.
    TurnRight,
    /// No meaningful hint could be derived.
    NotAligned,
}

/// Normalizes an angle in degrees into `[0, 360)`.
///
/// Non-finite input is returned unchanged.
///
/// # Examples
///
/// ```
/// use saferoute_core::geo::normalize_angle;
///
/// assert_eq!(normalize_angle(-90.0), 270.0);
/// assert_eq!(normalize_angle(720.0), 0.0);
/// ```
#[must_use]
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return angle;
    }
    let normalized = angle.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to exactly 360.0
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Shortest signed angular difference from `from` to `to`, in `(-180, 180]`.
///
/// Positive values are clockwise.
#[must_use]
pub fn signed_delta(from: f64, to: f64) -> f64 {
    let diff = normalize_angle(to - from);
    if diff > 180.0 {
        diff - 360.0
    } else {
        diff
    }
}

/// Bearing to a target relative to the observer's own heading, in `(-180, 180]`.
///
/// Negative means the target is to the left.
#[must_use]
pub fn relative_bearing(bearing_to_target: f64, heading: f64) -> f64 {
    signed_delta(heading, bearing_to_target)
}

/// Initial great-circle bearing from point 1 to point 2, in `[0, 360)`.
///
/// Coincident points yield `0.0`.
///
/// # Examples
///
/// ```
/// use saferoute_core::geo::bearing;
///
/// // Due east along the equator
/// assert!((bearing(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-9);
/// assert_eq!(bearing(12.5, 45.0, 12.5, 45.0), 0.0);
/// ```
#[must_use]
#[allow(clippy::float_cmp)]
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat1 == lat2 && lon1 == lon2 {
        return 0.0;
    }

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let y = d_lon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos().mul_add(
        lat2_rad.sin(),
        -(lat1_rad.sin() * lat2_rad.cos() * d_lon.cos()),
    );

    normalize_angle(y.atan2(x).to_degrees())
}

/// Great-circle distance in meters between two points (haversine).
///
/// # Examples
///
/// ```
/// use saferoute_core::geo::distance;
///
/// let d = distance(0.0, 0.0, 1.0, 1.0);
/// assert!((d - 157_249.6).abs() < 1.0);
/// ```
#[must_use]
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let half_d_lat = (lat2 - lat1).to_radians() / 2.0;
    let half_d_lon = (lon2 - lon1).to_radians() / 2.0;

    let a = (lat1_rad.cos() * lat2_rad.cos())
        .mul_add(half_d_lon.sin().powi(2), half_d_lat.sin().powi(2))
        .clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Determines which way to turn from `device_heading` to face `bearing_to_peer`.
///
/// # Examples
///
/// ```
/// use saferoute_core::geo::{direction_hint, DirectionHint};
///
/// assert_eq!(direction_hint(10.0, 20.0, 30.0), DirectionHint::FacingEachOther);
/// assert_eq!(direction_hint(0.0, 90.0, 30.0), DirectionHint::TurnRight);
/// assert_eq!(direction_hint(0.0, 270.0, 30.0), DirectionHint::TurnLeft);
/// ```
#[must_use]
pub fn direction_hint(device_heading: f64, bearing_to_peer: f64, tolerance: f64) -> DirectionHint {
    let diff = signed_delta(normalize_angle(device_heading), normalize_angle(bearing_to_peer));

    if !diff.is_finite() {
        return DirectionHint::NotAligned;
    }
    if diff.abs() <= tolerance {
        return DirectionHint::FacingEachOther;
    }
    if diff.abs() <= 180.0 {
        return if diff > 0.0 {
            DirectionHint::TurnRight
        } else {
            DirectionHint::TurnLeft
        };
    }

    debug_assert!(false, "signed_delta produced {diff} outside (-180, 180]");
    DirectionHint::NotAligned
}

/// Checks whether two devices are pointing at each other.
///
/// Device 1 must face `bearing_1_to_2` and device 2 must face the
/// reciprocal bearing, each within `tolerance` degrees.
#[must_use]
pub fn mutual_facing(heading1: f64, heading2: f64, bearing_1_to_2: f64, tolerance: f64) -> bool {
    let toward_2 = signed_delta(heading1, bearing_1_to_2);
    let toward_1 = signed_delta(heading2, bearing_1_to_2 + 180.0);
    toward_2.abs() <= tolerance && toward_1.abs() <= tolerance
}
