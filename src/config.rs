//! Configuration for discovery, links, navigation, and target lock.
//!
//! All sections have defaults, so a partial JSON document only needs to
//! name the values it overrides.
//!
//! ```
//! use saferoute_core::config::CompassConfig;
//!
//! let config = CompassConfig::from_json(r#"{"relay": {"endpoint": "192.168.1.10:9000"}}"#)
//!     .unwrap();
//! assert_eq!(config.relay.endpoint, "192.168.1.10:9000");
//! assert_eq!(config.relay.max_reconnect_attempts, 3);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document could not be parsed.
    #[error("Invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of its allowed range.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Local discovery channel and peer registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How often the local sample is broadcast.
    pub broadcast_interval_ms: u64,
    /// How often stale peers are evicted.
    pub eviction_interval_ms: u64,
    /// Age after which a silent peer is evicted.
    pub peer_ttl_ms: u64,
    /// Buffered messages per subscriber on the in-process channel.
    pub channel_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: 1_000,
            eviction_interval_ms: 5_000,
            peer_ttl_ms: 30_000,
            channel_capacity: 64,
        }
    }
}

/// Relay link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Rendezvous server address, `host:port`.
    pub endpoint: String,
    /// Budget for a single connect attempt.
    pub connect_timeout_ms: u64,
    /// Delay before the first automatic reconnect; doubles per attempt.
    pub base_delay_ms: u64,
    /// Automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: "10.144.1.141:8080".to_string(),
            connect_timeout_ms: 5_000,
            base_delay_ms: 1_000,
            max_reconnect_attempts: 3,
        }
    }
}

/// Direct peer link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectLinkConfig {
    /// STUN/TURN servers handed to the peer-connection backend.
    pub ice_servers: Vec<String>,
    /// Label of the ordered data channel.
    pub channel_label: String,
    /// Budget for offer/answer/ICE negotiation to reach an open channel.
    pub negotiation_timeout_ms: u64,
}

impl Default for DirectLinkConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            channel_label: "compass".to_string(),
            negotiation_timeout_ms: 15_000,
        }
    }
}

/// Bearing navigation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Tolerance for the "facing" direction hint.
    pub direction_tolerance_deg: f64,
    /// Tolerance for mutual facing between two devices.
    pub facing_tolerance_deg: f64,
    /// Samples younger than this are fresh.
    pub freshness_window_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            direction_tolerance_deg: crate::geo::DEFAULT_DIRECTION_TOLERANCE_DEG,
            facing_tolerance_deg: crate::geo::DEFAULT_FACING_TOLERANCE_DEG,
            freshness_window_ms: 60_000,
        }
    }
}

/// Target lock settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Warning countdown before a lock is released after confirmation loss.
    pub unlock_countdown_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            unlock_countdown_ms: 5_000,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompassConfig {
    /// Local discovery and registry.
    pub discovery: DiscoveryConfig,
    /// Relay link.
    pub relay: RelayConfig,
    /// Direct peer link.
    pub direct: DirectLinkConfig,
    /// Navigation controller.
    pub navigation: NavigationConfig,
    /// Target lock controller.
    pub lock: LockConfig,
}

impl DiscoveryConfig {
    /// Broadcast period.
    #[must_use]
    pub const fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    /// Eviction period.
    #[must_use]
    pub const fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }
}

impl RelayConfig {
    /// Connect budget.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Base reconnect delay.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl DirectLinkConfig {
    /// Negotiation budget.
    #[must_use]
    pub const fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }
}

impl NavigationConfig {
    /// Freshness window.
    #[must_use]
    pub const fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }
}

impl LockConfig {
    /// Unlock countdown.
    #[must_use]
    pub const fn unlock_countdown(&self) -> Duration {
        Duration::from_millis(self.unlock_countdown_ms)
    }
}

impl CompassConfig {
    /// Parses a JSON document, filling unspecified values with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or fails validation.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (extremely rare).
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.discovery;
        non_zero("discovery.broadcast_interval_ms", d.broadcast_interval_ms)?;
        non_zero("discovery.eviction_interval_ms", d.eviction_interval_ms)?;
        non_zero("discovery.channel_capacity", d.channel_capacity as u64)?;
        if d.peer_ttl_ms < d.broadcast_interval_ms {
            return Err(invalid(
                "discovery.peer_ttl_ms",
                format!(
                    "{} is shorter than the broadcast interval {}",
                    d.peer_ttl_ms, d.broadcast_interval_ms
                ),
            ));
        }

        let r = &self.relay;
        validate_endpoint(&r.endpoint)?;
        non_zero("relay.connect_timeout_ms", r.connect_timeout_ms)?;
        non_zero("relay.base_delay_ms", r.base_delay_ms)?;

        non_zero(
            "direct.negotiation_timeout_ms",
            self.direct.negotiation_timeout_ms,
        )?;

        let n = &self.navigation;
        tolerance(
            "navigation.direction_tolerance_deg",
            n.direction_tolerance_deg,
        )?;
        tolerance("navigation.facing_tolerance_deg", n.facing_tolerance_deg)?;
        non_zero("navigation.freshness_window_ms", n.freshness_window_ms)?;

        non_zero("lock.unlock_countdown_ms", self.lock.unlock_countdown_ms)?;
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidValue { field, reason }
}

fn non_zero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be greater than zero".to_string()));
    }
    Ok(())
}

fn tolerance(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0 && value <= 180.0) {
        return Err(invalid(field, format!("{value} is outside (0, 180]")));
    }
    Ok(())
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let Some((host, port)) = endpoint.rsplit_once(':') else {
        return Err(invalid(
            "relay.endpoint",
            format!("{endpoint:?} is not host:port"),
        ));
    };
    if host.is_empty() {
        return Err(invalid("relay.endpoint", "host is empty".to_string()));
    }
    if port.parse::<u16>().map_or(true, |p| p == 0) {
        return Err(invalid("relay.endpoint", format!("bad port {port:?}")));
    }
    Ok(())
}
