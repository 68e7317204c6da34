//! Log subscriber setup.
//!
//! The library only emits `tracing` events. Binaries and tests that want
//! output call [`init`] once at startup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Error returned when a global subscriber is already installed.
pub use tracing_subscriber::util::TryInitError;

/// Installs a formatted subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (e.g. `"saferoute_core=info"`) when the variable is
/// unset or invalid.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init(default_filter: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
}
