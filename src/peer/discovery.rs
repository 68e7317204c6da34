//! Local discovery over an in-process publish/subscribe channel.
//!
//! Every client context sharing a [`DiscoveryBus`] sees every other
//! context's announcements. This finds peers among one device's open
//! contexts; it is not cross-device networking.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::registry::PeerRegistry;
use super::types::DiscoveryMessage;
use crate::config::DiscoveryConfig;
use crate::location::{now_ms, LocalFix};

/// A named in-process broadcast channel.
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct DiscoveryBus {
    name: Arc<str>,
    tx: broadcast::Sender<DiscoveryMessage>,
}

impl DiscoveryBus {
    /// Creates a channel buffering `capacity` messages per subscriber.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(name: &str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            name: Arc::from(name),
            tx,
        }
    }

    /// The channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publishes a message, returning how many subscribers will see it.
    pub fn publish(&self, message: DiscoveryMessage) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    /// Opens a new subscription.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryMessage> {
        self.tx.subscribe()
    }
}

/// Whether local discovery is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStatus {
    /// Broadcasting and receiving.
    Available,
    /// No channel on this runtime, or stopped.
    Unavailable,
}

/// Periodically announces the local fix and records foreign announcements.
///
/// Owns three tasks: the broadcast timer, the receive loop, and the
/// registry eviction timer. All three stop on [`shutdown`](Self::shutdown)
/// or drop.
#[derive(Debug)]
pub struct LocalDiscovery {
    device_id: String,
    registry: Arc<PeerRegistry>,
    status: DiscoveryStatus,
    error: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl LocalDiscovery {
    /// Starts discovery on `bus`, announcing the latest value of `fix`.
    ///
    /// With no bus the component degrades to [`DiscoveryStatus::Unavailable`]
    /// and spawns nothing. Must be called within a Tokio runtime otherwise.
    #[must_use]
    pub fn start(
        bus: Option<&DiscoveryBus>,
        registry: Arc<PeerRegistry>,
        fix: watch::Receiver<LocalFix>,
        config: &DiscoveryConfig,
    ) -> Self {
        let device_id = registry.local_device_id().to_string();

        let Some(bus) = bus else {
            warn!("In-process discovery channel not available");
            return Self {
                device_id,
                registry,
                status: DiscoveryStatus::Unavailable,
                error: Some("Discovery channel not available".to_string()),
                tasks: Vec::new(),
            };
        };

        // Subscribe before the first broadcast so no announcement is missed.
        let rx = bus.subscribe();
        let ttl_ms = i64::try_from(config.peer_ttl_ms).unwrap_or(i64::MAX);

        let tasks = vec![
            tokio::spawn(receive_loop(rx, Arc::clone(&registry))),
            tokio::spawn(broadcast_loop(
                bus.clone(),
                device_id.clone(),
                fix,
                config.broadcast_interval(),
            )),
            tokio::spawn(eviction_loop(
                Arc::clone(&registry),
                config.eviction_interval(),
                ttl_ms,
            )),
        ];

        info!(device_id = %device_id, channel = bus.name(), "Local discovery started");
        Self {
            device_id,
            registry,
            status: DiscoveryStatus::Available,
            error: None,
            tasks,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> DiscoveryStatus {
        self.status
    }

    /// Returns true while broadcasting and receiving.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == DiscoveryStatus::Available
    }

    /// Why discovery is unavailable, if it is.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The registry fed by this channel.
    #[must_use]
    pub const fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Stops all timers and the subscription.
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.status = DiscoveryStatus::Unavailable;
        info!(device_id = %self.device_id, "Local discovery stopped");
    }
}

impl Drop for LocalDiscovery {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn receive_loop(mut rx: broadcast::Receiver<DiscoveryMessage>, registry: Arc<PeerRegistry>) {
    loop {
        match rx.recv().await {
            Ok(message) => {
                if message.device_id() == registry.local_device_id() {
                    continue;
                }
                registry.upsert(message.into_sample(now_ms()));
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Discovery receiver lagged; announcements dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Discovery channel closed");
                break;
            }
        }
    }
}

async fn broadcast_loop(
    bus: DiscoveryBus,
    device_id: String,
    fix: watch::Receiver<LocalFix>,
    period: std::time::Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let current = *fix.borrow();
        let receivers = bus.publish(DiscoveryMessage::announce(&device_id, &current));
        debug!(receivers, "Announced local fix");
    }
}

async fn eviction_loop(registry: Arc<PeerRegistry>, period: std::time::Duration, ttl_ms: i64) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let evicted = registry.evict_expired(ttl_ms);
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted stale peers");
        }
    }
}
