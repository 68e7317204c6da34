//! Presentation helpers for bearings and distances.

use super::bearing::normalize_angle;

/// The 16 compass points, clockwise from north in 22.5° steps.
pub const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// Formats a distance for display: whole meters below 1 km, else km with one decimal.
///
/// # Examples
///
/// ```
/// use saferoute_core::geo::format_distance;
///
/// assert_eq!(format_distance(125.4), "125 m");
/// assert_eq!(format_distance(1_234.0), "1.2 km");
/// ```
#[must_use]
pub fn format_distance(distance_m: f64) -> String {
    if distance_m < 1000.0 {
        format!("{} m", distance_m.round())
    } else {
        format!("{:.1} km", distance_m / 1000.0)
    }
}

/// Returns the nearest of the 16 compass points for a bearing.
///
/// # Examples
///
/// ```
/// use saferoute_core::geo::compass_name;
///
/// assert_eq!(compass_name(0.0), "N");
/// assert_eq!(compass_name(100.0), "E");
/// assert_eq!(compass_name(350.0), "N");
/// ```
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn compass_name(bearing: f64) -> &'static str {
    let normalized = normalize_angle(bearing);
    if !normalized.is_finite() {
        return COMPASS_POINTS[0];
    }
    // normalized is in [0, 360), so the rounded step is in [0, 16]
    let index = (normalized / 22.5).round() as usize % COMPASS_POINTS.len();
    COMPASS_POINTS[index]
}
