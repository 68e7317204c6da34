//! Local device position, heading, and the samples devices exchange.
//!
//! - [`Coordinates`]: validated latitude/longitude
//! - [`LocalFix`]: the local device's latest heading and position
//! - [`PeerSample`]: what a device reports about itself to others
//! - [`SensorHub`]: capability acquisition and reading intake for the
//!   local heading and location sensors
//!
//! # Example Usage
//!
//! ```
//! use saferoute_core::location::{Capability, SensorHub};
//!
//! let hub = SensorHub::new();
//! hub.acquire_heading(Capability::Granted);
//! hub.acquire_location(Capability::Granted);
//! hub.update_heading(370.0);
//! hub.update_location(37.7749, -122.4194);
//!
//! let fix = hub.fix();
//! assert_eq!(fix.heading, Some(10.0));
//! assert!(fix.is_complete());
//! ```

mod error;
mod sensor;
mod types;

pub use error::{SensorError, SensorKind};
pub use sensor::{Capability, PositionErrorKind, SensorHub, SensorState, SensorStatus};
pub use types::{now_ms, Coordinates, LocalFix, PeerSample};
