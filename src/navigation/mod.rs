//! Relative-bearing navigation.
//!
//! Two controllers sit on top of the peer and location layers:
//!
//! - [`NavigationController`] turns the local fix and one selected peer's
//!   latest sample into a [`NavigationReadout`]: bearing, distance,
//!   heading-compensated relative bearing, a turn hint, and freshness.
//! - [`TargetLockController`] pins the compass to one tracked person from an
//!   external [`PersonDirectory`]. It only locks while an external
//!   connection-confirmation signal is true and fails safe when that signal
//!   goes away.
//!
//! # Data flow
//!
//! ```text
//! SensorHub ──LocalFix──┐
//!                       ├──► NavigationController ──► NavigationReadout
//! PeerSource ─sample────┘
//!
//! PersonDirectory ──┐
//! confirmed: bool ──┴──► TargetLockController ──► LockReadout
//! ```
//!
//! Missing inputs always yield `None` outputs. A readout never carries a
//! value computed from data that is no longer available.

mod controller;
mod error;
mod lock;
mod types;

pub use controller::{evaluate, NavigationController};
pub use error::LockError;
pub use lock::TargetLockController;
pub use types::{
    BearingResult, Freshness, LockReadout, LockSession, NavigationReadout, PersonDirectory,
    TrackedPerson,
};
