//! Types for peer bookkeeping and local discovery.

use serde::{Deserialize, Serialize};

use crate::location::{LocalFix, PeerSample};

/// A peer as last seen by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRegistryEntry {
    /// The most recent sample received from the peer.
    pub sample: PeerSample,
    /// When the registry last heard from the peer (Unix milliseconds).
    pub last_seen_ms: i64,
}

impl PeerRegistryEntry {
    /// The peer's device id.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.sample.device_id
    }
}

/// Message carried on the in-process discovery channel.
///
/// # Wire format
///
/// ```json
/// {"type":"peer-location","deviceId":"K3F9QZ2A","heading":90.0,"latitude":1.0,"longitude":2.0}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DiscoveryMessage {
    /// A device announcing its heading and position.
    PeerLocation {
        /// Announcing device.
        #[serde(rename = "deviceId")]
        device_id: String,
        /// Heading in degrees, if known.
        heading: Option<f64>,
        /// Latitude in degrees, if known.
        latitude: Option<f64>,
        /// Longitude in degrees, if known.
        longitude: Option<f64>,
    },
}

impl DiscoveryMessage {
    /// Builds an announcement of `fix` on behalf of `device_id`.
    #[must_use]
    pub fn announce(device_id: &str, fix: &LocalFix) -> Self {
        Self::PeerLocation {
            device_id: device_id.to_string(),
            heading: fix.heading,
            latitude: fix.coordinates.map(|c| c.latitude),
            longitude: fix.coordinates.map(|c| c.longitude),
        }
    }

    /// The announcing device's id.
    #[must_use]
    pub fn device_id(&self) -> &str {
        match self {
            Self::PeerLocation { device_id, .. } => device_id,
        }
    }

    /// Converts the announcement into a sample stamped with `received_at_ms`.
    #[must_use]
    pub fn into_sample(self, received_at_ms: i64) -> PeerSample {
        match self {
            Self::PeerLocation {
                device_id,
                heading,
                latitude,
                longitude,
            } => PeerSample {
                device_id,
                heading,
                latitude,
                longitude,
                timestamp_ms: received_at_ms,
            },
        }
    }
}
