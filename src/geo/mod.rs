//! Geodetic math for relative-bearing navigation.
//!
//! Pure, stateless functions over a spherical Earth model:
//! - Initial bearing between two points (spherical trigonometry)
//! - Great-circle distance (haversine, mean Earth radius)
//! - Angle normalisation and shortest signed angular difference
//! - Direction hints and mutual-facing checks
//! - Presentation helpers (formatted distance, 16-point compass names)
//!
//! All angles crossing the public API are in degrees. Radians are used
//! internally only.
//!
//! # Example
//!
//! ```
//! use saferoute_core::geo::{bearing, compass_name, distance, format_distance};
//!
//! let b = bearing(0.0, 0.0, 1.0, 1.0);
//! let d = distance(0.0, 0.0, 1.0, 1.0);
//! assert_eq!(compass_name(b), "NE");
//! assert_eq!(format_distance(d), "157.2 km");
//! ```
//!
//! # Limitations
//!
//! - The Earth is treated as a sphere, not an oblate spheroid
//! - Sensor headings are magnetic and subject to local interference

mod bearing;
mod format;

pub use bearing::{
    bearing, direction_hint, distance, mutual_facing, normalize_angle, relative_bearing,
    signed_delta, DirectionHint, DEFAULT_DIRECTION_TOLERANCE_DEG, DEFAULT_FACING_TOLERANCE_DEG,
    EARTH_RADIUS_M,
};
pub use format::{compass_name, format_distance, COMPASS_POINTS};
