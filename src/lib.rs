//! SafeRoute Core Library
//!
//! Relative-bearing peer navigation: works out, from intermittently
//! available sensors, which way and how far another device is, across three
//! transport tiers.
//!
//! # Modules
//!
//! - [`geo`]: bearing, distance, and direction math on a spherical Earth
//! - [`location`]: local sensor state and the peer sample wire type
//! - [`peer`]: peer registry with TTL eviction and in-process discovery
//! - [`link`]: direct peer link and relay link state machines
//! - [`navigation`]: navigation readouts and the target lock
//! - [`config`]: configuration with defaults and validation
//! - [`logging`]: opt-in `tracing` subscriber setup
//!
//! [`CompassCore`] wires one instance of each component together.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

mod api;
pub mod config;
pub mod error;
pub mod geo;
pub mod link;
pub mod location;
pub mod logging;
pub mod navigation;
pub mod peer;

pub use api::{CompassCore, PeerFeed, ShareOutcome, RELAY_PEER_ID};
pub use config::CompassConfig;
pub use error::{CompassError, ErrorKind, Result};
