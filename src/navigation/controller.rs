//! Bearing navigation controller.
//!
//! Combines the local fix with the selected target's latest sample and
//! publishes a [`NavigationReadout`] on every evaluation. Evaluation is
//! event driven: a new fix, a target change, or a peer update. There is no
//! polling timer.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::types::{BearingResult, Freshness, NavigationReadout};
use crate::config::NavigationConfig;
use crate::geo;
use crate::location::{now_ms, LocalFix, PeerSample};
use crate::peer::PeerSource;

/// Computes one readout.
///
/// Derived fields stay `None` unless the local heading, the local position,
/// and the peer position are all present.
#[must_use]
pub fn evaluate(
    fix: &LocalFix,
    target_id: Option<&str>,
    peer: Option<&PeerSample>,
    now_ms: i64,
    config: &NavigationConfig,
) -> NavigationReadout {
    let mut readout = NavigationReadout {
        target_id: target_id.map(str::to_string),
        target_connected: peer.is_some(),
        freshness: Freshness::classify(
            peer.map(|p| p.age_ms(now_ms)),
            config.freshness_window_ms,
        ),
        ..NavigationReadout::default()
    };

    let (Some(heading), Some(local), Some(remote)) = (
        fix.heading,
        fix.coordinates,
        peer.and_then(PeerSample::position),
    ) else {
        return readout;
    };

    let result = BearingResult::between(&local, &remote);
    readout.relative_bearing_deg = Some(geo::relative_bearing(result.bearing_deg, heading));
    readout.hint = Some(geo::direction_hint(
        heading,
        result.bearing_deg,
        config.direction_tolerance_deg,
    ));
    readout.mutual_facing = peer.and_then(PeerSample::heading).map(|peer_heading| {
        geo::mutual_facing(
            heading,
            peer_heading,
            result.bearing_deg,
            config.facing_tolerance_deg,
        )
    });
    readout.distance_text = Some(geo::format_distance(result.distance_meters));
    readout.compass_point = Some(geo::compass_name(result.bearing_deg));
    readout.bearing = Some(result);
    readout
}

#[derive(Default)]
struct ControllerState {
    fix: LocalFix,
    target: Option<String>,
}

/// Event-driven navigation toward one selected peer.
pub struct NavigationController {
    source: Arc<dyn PeerSource>,
    config: NavigationConfig,
    state: Mutex<ControllerState>,
    readout: watch::Sender<NavigationReadout>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
}

impl NavigationController {
    /// Creates a controller reading peer samples from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn PeerSource>, config: NavigationConfig) -> Self {
        let (readout, _) = watch::channel(NavigationReadout::default());
        Self {
            source,
            config,
            state: Mutex::new(ControllerState::default()),
            readout,
            drivers: Mutex::new(Vec::new()),
        }
    }

    /// Selects the peer to navigate toward, or clears the selection.
    pub fn select_target(&self, device_id: Option<&str>) -> NavigationReadout {
        self.state.lock().target = device_id.map(str::to_string);
        debug!(target_id = ?device_id, "Navigation target changed");
        self.evaluate()
    }

    /// Currently selected target.
    #[must_use]
    pub fn target(&self) -> Option<String> {
        self.state.lock().target.clone()
    }

    /// Records a new local fix and re-evaluates.
    pub fn on_fix(&self, fix: LocalFix) -> NavigationReadout {
        self.state.lock().fix = fix;
        self.evaluate()
    }

    /// Re-evaluates after the target's data changed.
    pub fn on_peer_update(&self) -> NavigationReadout {
        self.evaluate()
    }

    /// Computes and publishes a fresh readout.
    pub fn evaluate(&self) -> NavigationReadout {
        let (fix, target) = {
            let state = self.state.lock();
            (state.fix, state.target.clone())
        };
        let peer = target.as_deref().and_then(|id| self.source.latest(id));
        let readout = evaluate(&fix, target.as_deref(), peer.as_ref(), now_ms(), &self.config);
        self.readout.send_replace(readout.clone());
        readout
    }

    /// Most recently published readout.
    #[must_use]
    pub fn readout(&self) -> NavigationReadout {
        self.readout.borrow().clone()
    }

    /// Subscribes to readouts.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NavigationReadout> {
        self.readout.subscribe()
    }

    /// Re-evaluates on every fix published on `fixes`.
    pub fn follow_fixes(self: &Arc<Self>, mut fixes: watch::Receiver<LocalFix>) {
        let weak = Arc::downgrade(self);
        let initial = *fixes.borrow_and_update();
        self.on_fix(initial);
        self.spawn_driver(async move {
            while fixes.changed().await.is_ok() {
                let fix = *fixes.borrow_and_update();
                let Some(controller) = weak.upgrade() else {
                    return;
                };
                controller.on_fix(fix);
            }
        });
    }

    /// Re-evaluates whenever `updates` changes, e.g. a link snapshot.
    pub fn follow_updates<T>(self: &Arc<Self>, mut updates: watch::Receiver<T>)
    where
        T: Send + Sync + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.spawn_driver(async move {
            while updates.changed().await.is_ok() {
                let Some(controller) = weak.upgrade() else {
                    return;
                };
                controller.on_peer_update();
            }
        });
    }

    fn spawn_driver<F>(&self, driver: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut drivers = self.drivers.lock();
        drivers.retain(|handle| !handle.is_finished());
        drivers.push(tokio::spawn(driver));
    }

    /// Stops all follow tasks.
    pub fn stop(&self) {
        for handle in self.drivers.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for NavigationController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for NavigationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationController")
            .field("target", &self.target())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::geo::DirectionHint;
    use crate::location::Coordinates;
    use crate::peer::PeerSlot;

    fn fix(heading: f64, lat: f64, lon: f64) -> LocalFix {
        LocalFix::new(Some(heading), Coordinates::new(lat, lon))
    }

    fn peer(id: &str, lat: f64, lon: f64, timestamp_ms: i64) -> PeerSample {
        PeerSample {
            device_id: id.to_string(),
            heading: Some(225.0),
            latitude: Some(lat),
            longitude: Some(lon),
            timestamp_ms,
        }
    }

    #[test]
    fn complete_inputs_produce_a_readout() {
        let sample = peer("PEER0001", 1.0, 1.0, 1_000);

        let readout = evaluate(
            &fix(0.0, 0.0, 0.0),
            Some("PEER0001"),
            Some(&sample),
            1_500,
            &NavigationConfig::default(),
        );

        let bearing = readout.bearing.unwrap();
        assert!((bearing.bearing_deg - 44.995_636).abs() < 1e-3);
        assert!((bearing.distance_meters - 157_249.6).abs() < 1.0);
        assert!((readout.relative_bearing_deg.unwrap() - 44.995_636).abs() < 1e-3);
        assert_eq!(readout.hint, Some(DirectionHint::TurnRight));
        assert_eq!(readout.compass_point, Some("NE"));
        assert_eq!(readout.distance_text.as_deref(), Some("157.2 km"));
        assert_eq!(readout.freshness, Freshness::Fresh);
        assert!(readout.target_connected);
    }

    #[test]
    fn peer_heading_enables_mutual_facing() {
        let sample = peer("PEER0001", 1.0, 1.0, 0);

        let readout = evaluate(
            &fix(45.0, 0.0, 0.0),
            Some("PEER0001"),
            Some(&sample),
            0,
            &NavigationConfig::default(),
        );

        assert_eq!(readout.mutual_facing, Some(true));
        assert_eq!(readout.hint, Some(DirectionHint::FacingEachOther));
    }

    #[test]
    fn missing_heading_yields_nothing() {
        let local = LocalFix::new(None, Coordinates::new(0.0, 0.0));
        let sample = peer("PEER0001", 1.0, 1.0, 0);

        let readout = evaluate(&local, Some("PEER0001"), Some(&sample), 0, &NavigationConfig::default());

        assert!(readout.bearing.is_none());
        assert!(readout.relative_bearing_deg.is_none());
        assert!(readout.hint.is_none());
        assert!(readout.target_connected);
    }

    #[test]
    fn missing_peer_position_yields_nothing() {
        let mut sample = peer("PEER0001", 1.0, 1.0, 0);
        sample.longitude = None;

        let readout = evaluate(
            &fix(0.0, 0.0, 0.0),
            Some("PEER0001"),
            Some(&sample),
            0,
            &NavigationConfig::default(),
        );

        assert!(readout.bearing.is_none());
        assert!(readout.compass_point.is_none());
    }

    #[test]
    fn old_sample_is_stale() {
        let sample = peer("PEER0001", 1.0, 1.0, 0);

        let readout = evaluate(
            &fix(0.0, 0.0, 0.0),
            Some("PEER0001"),
            Some(&sample),
            60_000,
            &NavigationConfig::default(),
        );

        assert_eq!(readout.freshness, Freshness::Stale);
    }

    #[test]
    fn no_peer_is_unknown() {
        let readout = evaluate(&fix(0.0, 0.0, 0.0), Some("GONE"), None, 0, &NavigationConfig::default());

        assert_eq!(readout.freshness, Freshness::Unknown);
        assert!(!readout.target_connected);
        assert!(readout.bearing.is_none());
    }

    #[test]
    fn values_do_not_outlive_their_inputs() {
        let slot = PeerSlot::new();
        let controller = NavigationController::new(Arc::new(slot.clone()), NavigationConfig::default());
        slot.set(peer("PEER0001", 1.0, 1.0, now_ms()));
        controller.select_target(Some("PEER0001"));

        assert!(controller.on_fix(fix(0.0, 0.0, 0.0)).bearing.is_some());

        slot.clear();
        let readout = controller.on_peer_update();

        assert!(readout.bearing.is_none());
        assert!(!readout.target_connected);
    }

    #[test]
    fn clearing_target_clears_readout() {
        let slot = PeerSlot::new();
        slot.set(peer("PEER0001", 1.0, 1.0, now_ms()));
        let controller = NavigationController::new(Arc::new(slot), NavigationConfig::default());
        controller.on_fix(fix(0.0, 0.0, 0.0));
        assert!(controller.select_target(Some("PEER0001")).bearing.is_some());

        let readout = controller.select_target(None);

        assert!(readout.target_id.is_none());
        assert!(readout.bearing.is_none());
        assert_eq!(controller.readout(), readout);
    }

    #[tokio::test]
    async fn follows_fix_stream() {
        let slot = PeerSlot::new();
        slot.set(peer("PEER0001", 1.0, 1.0, now_ms()));
        let controller = Arc::new(NavigationController::new(
            Arc::new(slot),
            NavigationConfig::default(),
        ));
        controller.select_target(Some("PEER0001"));
        let (tx, rx) = watch::channel(LocalFix::default());
        let mut readouts = controller.subscribe();

        controller.follow_fixes(rx);
        tx.send(fix(90.0, 0.0, 0.0)).unwrap();

        let readout = tokio::time::timeout(
            Duration::from_secs(1),
            readouts.wait_for(|r| r.relative_bearing_deg.is_some()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert!((readout.relative_bearing_deg.unwrap() + 45.004_364).abs() < 1e-3);
        assert_eq!(readout.hint, Some(DirectionHint::TurnLeft));
    }
}
