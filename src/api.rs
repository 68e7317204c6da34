//! Top-level entry point.
//!
//! [`CompassCore`] owns one instance of every stateful component and wires
//! them together. It replaces any notion of a global client: whatever
//! composes the controllers constructs a core and passes it around.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;

use crate::config::{CompassConfig, ConfigError};
use crate::link::{
    DirectLink, LinkResult, LinkState, PeerConnectionFactory, RelayLink, RelayTransport,
    SendOutcome,
};
use crate::location::{now_ms, PeerSample, SensorHub};
use crate::navigation::{NavigationController, PersonDirectory, TargetLockController};
use crate::peer::{
    generate_device_id, DiscoveryBus, DiscoveryStatus, LocalDiscovery, PeerRegistry, PeerSlot,
    PeerSource,
};

/// Device id given to relay frames that carry none.
pub const RELAY_PEER_ID: &str = "relay";

/// Where a navigation controller reads its target's samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerFeed {
    /// Peers found by local discovery.
    Registry,
    /// The remote end of the direct link.
    Direct,
    /// Frames received from the relay.
    Relay,
}

/// Outcome of sharing the local fix on both links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareOutcome {
    /// Direct link result.
    pub direct: SendOutcome,
    /// Relay link result.
    pub relay: SendOutcome,
}

/// Core interface for relative-bearing navigation.
///
/// # Example
///
/// ```rust,ignore
/// let core = CompassCore::new(
///     CompassConfig::default(),
///     Arc::new(TcpRelayTransport),
///     Arc::new(LoopbackNetwork::new()),
/// )?;
///
/// core.start_discovery(Some(&bus));
/// core.connect_relay().await?;
/// let navigation = core.navigation(PeerFeed::Registry);
/// navigation.select_target(Some("K3F9QZ2A"));
/// ```
pub struct CompassCore {
    config: CompassConfig,
    device_id: String,
    sensors: Arc<SensorHub>,
    registry: Arc<PeerRegistry>,
    discovery: Mutex<Option<LocalDiscovery>>,
    direct: DirectLink,
    relay: RelayLink,
    relay_peer: PeerSlot,
    relay_updates: Arc<watch::Sender<u64>>,
}

impl CompassCore {
    /// Creates a core with a freshly generated device id.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(
        config: CompassConfig,
        relay_transport: Arc<dyn RelayTransport>,
        peer_factory: Arc<dyn PeerConnectionFactory>,
    ) -> Result<Self, ConfigError> {
        Self::with_device_id(config, generate_device_id(), relay_transport, peer_factory)
    }

    /// Creates a core for a known device id.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn with_device_id(
        config: CompassConfig,
        device_id: impl Into<String>,
        relay_transport: Arc<dyn RelayTransport>,
        peer_factory: Arc<dyn PeerConnectionFactory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let device_id = device_id.into();
        let (relay_updates, _) = watch::channel(0);

        info!(device_id = %device_id, relay = %config.relay.endpoint, "Compass core created");
        Ok(Self {
            registry: Arc::new(PeerRegistry::new(device_id.clone())),
            sensors: Arc::new(SensorHub::new()),
            discovery: Mutex::new(None),
            direct: DirectLink::new(peer_factory, config.direct.clone()),
            relay: RelayLink::new(relay_transport, config.relay.clone()),
            relay_peer: PeerSlot::new(),
            relay_updates: Arc::new(relay_updates),
            device_id,
            config,
        })
    }

    /// This device's identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Validated configuration.
    #[must_use]
    pub const fn config(&self) -> &CompassConfig {
        &self.config
    }

    /// Local heading and location.
    #[must_use]
    pub const fn sensors(&self) -> &Arc<SensorHub> {
        &self.sensors
    }

    /// Peers found by local discovery.
    #[must_use]
    pub const fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Direct peer link.
    #[must_use]
    pub const fn direct(&self) -> &DirectLink {
        &self.direct
    }

    /// Relay link.
    #[must_use]
    pub const fn relay(&self) -> &RelayLink {
        &self.relay
    }

    /// Latest sample received from the relay.
    #[must_use]
    pub const fn relay_peer(&self) -> &PeerSlot {
        &self.relay_peer
    }

    /// Starts local discovery on `bus`, replacing any running instance.
    ///
    /// Passing `None` models a runtime without an in-process channel.
    pub fn start_discovery(&self, bus: Option<&DiscoveryBus>) -> DiscoveryStatus {
        let discovery = LocalDiscovery::start(
            bus,
            Arc::clone(&self.registry),
            self.sensors.subscribe(),
            &self.config.discovery,
        );
        let status = discovery.status();
        if let Some(mut previous) = self.discovery.lock().replace(discovery) {
            previous.shutdown();
        }
        status
    }

    /// Stops local discovery.
    pub fn stop_discovery(&self) {
        if let Some(mut discovery) = self.discovery.lock().take() {
            discovery.shutdown();
        }
    }

    /// Local discovery status.
    #[must_use]
    pub fn discovery_status(&self) -> DiscoveryStatus {
        self.discovery
            .lock()
            .as_ref()
            .map_or(DiscoveryStatus::Unavailable, LocalDiscovery::status)
    }

    /// Connects the relay, recording received frames in [`Self::relay_peer`].
    ///
    /// # Errors
    ///
    /// Returns the relay connect error; see [`RelayLink::connect`].
    pub async fn connect_relay(&self) -> LinkResult<()> {
        let slot = self.relay_peer.clone();
        let updates = Arc::clone(&self.relay_updates);
        self.relay
            .connect(move |frame| {
                slot.set(frame.into_sample(RELAY_PEER_ID));
                updates.send_modify(|n| *n = n.wrapping_add(1));
            })
            .await
    }

    /// The local fix as a sample stamped now.
    #[must_use]
    pub fn local_sample(&self) -> PeerSample {
        PeerSample::from_fix(self.device_id.clone(), &self.sensors.fix(), now_ms())
    }

    /// Sends the local fix on the direct link and, once the relay has been
    /// asked to connect, on the relay.
    pub fn share_location(&self) -> ShareOutcome {
        let sample = self.local_sample();
        let relay = if self.relay.state() == LinkState::Idle {
            SendOutcome::Dropped
        } else {
            self.relay.send(&sample)
        };
        ShareOutcome {
            direct: self.direct.send(&sample),
            relay,
        }
    }

    /// Creates a navigation controller fed by `feed` and the local sensors.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn navigation(&self, feed: PeerFeed) -> Arc<NavigationController> {
        let source: Arc<dyn PeerSource> = match feed {
            PeerFeed::Registry => Arc::clone(&self.registry) as Arc<dyn PeerSource>,
            PeerFeed::Direct => Arc::new(self.direct.remote_slot()),
            PeerFeed::Relay => Arc::new(self.relay_peer.clone()),
        };
        let controller = Arc::new(NavigationController::new(
            source,
            self.config.navigation.clone(),
        ));
        controller.follow_fixes(self.sensors.subscribe());
        match feed {
            PeerFeed::Registry => controller.follow_updates(self.registry.subscribe()),
            PeerFeed::Direct => controller.follow_updates(self.direct.subscribe()),
            PeerFeed::Relay => controller.follow_updates(self.relay_updates.subscribe()),
        }
        controller
    }

    /// Creates a target lock over `directory`, authorised by `confirmed`.
    ///
    /// The lock follows the local fix and publishes a fresh readout on
    /// every change. Must be called within a Tokio runtime.
    #[must_use]
    pub fn target_lock(
        &self,
        directory: Arc<dyn PersonDirectory>,
        confirmed: watch::Receiver<bool>,
    ) -> TargetLockController {
        let lock = TargetLockController::new(
            directory,
            confirmed,
            &self.config.lock,
            &self.config.navigation,
        );
        lock.follow_fixes(self.sensors.subscribe());
        lock
    }

    /// Stops discovery and closes both links.
    pub fn shutdown(&self) {
        self.stop_discovery();
        self.direct.disconnect();
        self.relay.disconnect();
        info!(device_id = %self.device_id, "Compass core shut down");
    }
}

impl std::fmt::Debug for CompassCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompassCore")
            .field("device_id", &self.device_id)
            .field("direct", &self.direct.state())
            .field("relay", &self.relay.state())
            .finish_non_exhaustive()
    }
}
