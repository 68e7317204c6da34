//! Target lock controller.
//!
//! Pins navigation to one tracked person. A lock may only be taken while
//! the external connection-confirmation signal is true. If the signal is
//! withdrawn while locked, the session is flagged with a warning and a
//! countdown starts; unless the signal comes back first, the lock is
//! released when the countdown elapses. A closed signal counts as
//! withdrawn.
//!
//! While locked, every local fix (via [`TargetLockController::follow_fixes`])
//! and every directory change notification (via
//! [`TargetLockController::follow_updates`]) re-evaluates the lock and
//! publishes a [`LockReadout`]. Unlocking publishes the empty readout.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::LockError;
use super::types::{BearingResult, Freshness, LockReadout, LockSession, PersonDirectory};
use crate::config::{LockConfig, NavigationConfig};
use crate::geo;
use crate::location::{Coordinates, LocalFix};

#[derive(Default)]
struct LockState {
    session: Option<LockSession>,
    countdown: Option<JoinHandle<()>>,
    generation: u64,
    local: Option<Coordinates>,
}

impl LockState {
    fn cancel_countdown(&mut self) -> bool {
        self.generation += 1;
        match self.countdown.take() {
            Some(countdown) => {
                countdown.abort();
                true
            }
            None => false,
        }
    }
}

struct LockShared {
    directory: Arc<dyn PersonDirectory>,
    confirmed: watch::Receiver<bool>,
    countdown: Duration,
    freshness_window_ms: u64,
    state: Mutex<LockState>,
    session_tx: watch::Sender<Option<LockSession>>,
    readout_tx: watch::Sender<LockReadout>,
}

impl LockShared {
    fn is_confirmed(&self) -> bool {
        self.confirmed.has_changed().is_ok() && *self.confirmed.borrow()
    }

    fn on_confirmation(self: &Arc<Self>, confirmed: bool) {
        if self.apply_confirmation(confirmed) {
            self.publish();
        }
    }

    /// Returns true if the session changed.
    fn apply_confirmation(self: &Arc<Self>, confirmed: bool) -> bool {
        let mut state = self.state.lock();
        if confirmed {
            if !state.cancel_countdown() {
                return false;
            }
            let Some(session) = state.session.take() else {
                return false;
            };
            info!(target_id = %session.target_id, "Connection confirmation restored");
            let restored = LockSession {
                warning_active: false,
                ..session
            };
            state.session = Some(restored.clone());
            self.session_tx.send_replace(Some(restored));
            return true;
        }

        let Some(session) = state.session.as_ref() else {
            return false;
        };
        if session.warning_active {
            return false;
        }

        let warned = LockSession {
            warning_active: true,
            ..session.clone()
        };
        warn!(
            target_id = %warned.target_id,
            countdown_ms = u64::try_from(self.countdown.as_millis()).unwrap_or(u64::MAX),
            "Connection confirmation lost, lock will be released"
        );
        state.cancel_countdown();
        let generation = state.generation;
        let weak = Arc::downgrade(self);
        let countdown = self.countdown;
        state.countdown = Some(tokio::spawn(async move {
            tokio::time::sleep(countdown).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire(generation);
            }
        }));
        state.session = Some(warned.clone());
        self.session_tx.send_replace(Some(warned));
        true
    }

    fn expire(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.countdown = None;
            if let Some(session) = state.session.take() {
                warn!(target_id = %session.target_id, "Lock released after confirmation loss");
            }
            self.session_tx.send_replace(None);
        }
        self.publish();
    }

    fn evaluate_at(&self, local: Option<Coordinates>, now: DateTime<Utc>) -> LockReadout {
        let Some(target_id) = self.state.lock().session.as_ref().map(|s| s.target_id.clone())
        else {
            return LockReadout::default();
        };
        let person = self.directory.person(&target_id);
        let last_update = person.as_ref().and_then(|p| p.last_update);

        let session = {
            let mut state = self.state.lock();
            let Some(current) = state.session.clone() else {
                return LockReadout::default();
            };
            if current.target_id != target_id || current.last_peer_update == last_update {
                current
            } else {
                let updated = LockSession {
                    last_peer_update: last_update,
                    ..current
                };
                state.session = Some(updated.clone());
                self.session_tx.send_replace(Some(updated.clone()));
                updated
            }
        };

        let result = match (local, person.and_then(|p| p.last_known_location)) {
            (Some(from), Some(to)) => Some(BearingResult::between(&from, &to)),
            _ => None,
        };

        LockReadout {
            is_locked: true,
            target_id: Some(session.target_id),
            target_name: Some(session.target_name),
            bearing_deg: result.map(|r| geo::normalize_angle(r.bearing_deg.round())),
            distance_m: result.map(|r| r.distance_meters.round()),
            freshness: Freshness::since(session.last_peer_update, now, self.freshness_window_ms),
            last_update: session.last_peer_update,
            warning_active: session.warning_active,
        }
    }

    /// Re-evaluates from the last followed fix and publishes the readout.
    ///
    /// Evaluation runs under the channel's write lock so concurrent
    /// publishers cannot reorder readouts.
    fn publish(&self) {
        self.readout_tx.send_if_modified(|current| {
            let local = self.state.lock().local;
            let readout = self.evaluate_at(local, Utc::now());
            if *current == readout {
                return false;
            }
            *current = readout;
            true
        });
    }

    fn on_fix(&self, fix: &LocalFix) {
        self.state.lock().local = fix.coordinates;
        self.publish();
    }
}

async fn watch_confirmation(shared: Weak<LockShared>, mut confirmed: watch::Receiver<bool>) {
    while confirmed.changed().await.is_ok() {
        let value = *confirmed.borrow_and_update();
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.on_confirmation(value);
    }
    if let Some(shared) = shared.upgrade() {
        debug!("Confirmation signal closed");
        shared.on_confirmation(false);
    }
}

/// Locks navigation onto a tracked person.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use saferoute_core::config::{LockConfig, NavigationConfig};
/// use saferoute_core::location::Coordinates;
/// use saferoute_core::navigation::{PersonDirectory, TargetLockController, TrackedPerson};
/// use tokio::sync::watch;
///
/// struct Roster;
///
/// impl PersonDirectory for Roster {
///     fn person(&self, unique_id: &str) -> Option<TrackedPerson> {
///         Some(TrackedPerson {
///             unique_id: unique_id.to_string(),
///             name: "Dana".to_string(),
///             last_known_location: Coordinates::new(0.0, 1.0),
///             last_update: None,
///         })
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), saferoute_core::navigation::LockError> {
/// let (_confirmed_tx, confirmed_rx) = watch::channel(true);
/// let lock = TargetLockController::new(
///     Arc::new(Roster),
///     confirmed_rx,
///     &LockConfig::default(),
///     &NavigationConfig::default(),
/// );
///
/// lock.lock_compass("person-7", Some("Dana"))?;
/// let readout = lock.evaluate(Coordinates::new(0.0, 0.0));
/// assert_eq!(readout.bearing_deg, Some(90.0));
/// # Ok(())
/// # }
/// ```
pub struct TargetLockController {
    shared: Arc<LockShared>,
    watcher: JoinHandle<()>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
}

impl TargetLockController {
    /// Creates an unlocked controller. Must be called within a tokio runtime.
    #[must_use]
    pub fn new(
        directory: Arc<dyn PersonDirectory>,
        confirmed: watch::Receiver<bool>,
        lock: &LockConfig,
        navigation: &NavigationConfig,
    ) -> Self {
        let (session_tx, _) = watch::channel(None);
        let (readout_tx, _) = watch::channel(LockReadout::default());
        let mut watched = confirmed.clone();
        watched.mark_unchanged();
        let shared = Arc::new(LockShared {
            directory,
            confirmed,
            countdown: lock.unlock_countdown(),
            freshness_window_ms: navigation.freshness_window_ms,
            state: Mutex::new(LockState::default()),
            session_tx,
            readout_tx,
        });
        let watcher = tokio::spawn(watch_confirmation(Arc::downgrade(&shared), watched));
        Self {
            shared,
            watcher,
            drivers: Mutex::new(Vec::new()),
        }
    }

    /// Locks onto `target_id`, replacing any existing lock.
    ///
    /// The display name defaults to the identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::NotConfirmed`] unless the confirmation signal
    /// is currently true, or [`LockError::InvalidTarget`] for an empty id.
    pub fn lock_compass(&self, target_id: &str, name: Option<&str>) -> Result<LockSession, LockError> {
        if target_id.trim().is_empty() {
            return Err(LockError::InvalidTarget("empty target id".to_string()));
        }
        if !self.shared.is_confirmed() {
            warn!(target_id, "Lock rejected without a confirmed connection");
            return Err(LockError::NotConfirmed);
        }

        let last_peer_update = self
            .shared
            .directory
            .person(target_id)
            .and_then(|person| person.last_update);
        let session = LockSession {
            target_id: target_id.to_string(),
            target_name: name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(target_id)
                .to_string(),
            locked_at: Utc::now(),
            last_peer_update,
            warning_active: false,
        };

        {
            let mut state = self.shared.state.lock();
            state.cancel_countdown();
            state.session = Some(session.clone());
            self.shared.session_tx.send_replace(Some(session.clone()));
        }
        info!(target_id, name = %session.target_name, "Compass locked");
        self.shared.publish();
        Ok(session)
    }

    /// Releases the lock and cancels any pending countdown.
    pub fn unlock_compass(&self) {
        {
            let mut state = self.shared.state.lock();
            state.cancel_countdown();
            let Some(session) = state.session.take() else {
                return;
            };
            info!(target_id = %session.target_id, "Compass unlocked");
            self.shared.session_tx.send_replace(None);
        }
        self.shared.publish();
    }

    /// Evaluates the lock from the local position.
    #[must_use]
    pub fn evaluate(&self, local: Option<Coordinates>) -> LockReadout {
        self.evaluate_at(local, Utc::now())
    }

    /// Evaluates the lock as observed at `now`.
    #[must_use]
    pub fn evaluate_at(&self, local: Option<Coordinates>, now: DateTime<Utc>) -> LockReadout {
        self.shared.evaluate_at(local, now)
    }

    /// Most recently published readout.
    #[must_use]
    pub fn readout(&self) -> LockReadout {
        self.shared.readout_tx.borrow().clone()
    }

    /// Subscribes to published readouts.
    #[must_use]
    pub fn subscribe_readout(&self) -> watch::Receiver<LockReadout> {
        self.shared.readout_tx.subscribe()
    }

    /// Re-evaluates and publishes on every fix published on `fixes`.
    pub fn follow_fixes(&self, mut fixes: watch::Receiver<LocalFix>) {
        let initial = *fixes.borrow_and_update();
        self.shared.on_fix(&initial);
        let weak = Arc::downgrade(&self.shared);
        self.spawn_driver(async move {
            while fixes.changed().await.is_ok() {
                let fix = *fixes.borrow_and_update();
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                shared.on_fix(&fix);
            }
        });
    }

    /// Re-evaluates and publishes whenever `updates` changes, e.g. a
    /// directory revision.
    pub fn follow_updates<T>(&self, mut updates: watch::Receiver<T>)
    where
        T: Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        self.spawn_driver(async move {
            while updates.changed().await.is_ok() {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                shared.publish();
            }
        });
    }

    fn spawn_driver<F>(&self, driver: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut drivers = self.drivers.lock();
        drivers.retain(|handle| !handle.is_finished());
        drivers.push(tokio::spawn(driver));
    }

    /// Current session.
    #[must_use]
    pub fn session(&self) -> Option<LockSession> {
        self.shared.state.lock().session.clone()
    }

    /// Returns true while a lock is held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.shared.state.lock().session.is_some()
    }

    /// Returns true while the unlock countdown is running.
    #[must_use]
    pub fn is_warning_active(&self) -> bool {
        self.shared
            .state
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| s.warning_active)
    }

    /// Subscribes to session changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<LockSession>> {
        self.shared.session_tx.subscribe()
    }
}

impl Drop for TargetLockController {
    fn drop(&mut self) {
        self.watcher.abort();
        for driver in self.drivers.get_mut().drain(..) {
            driver.abort();
        }
        self.shared.state.lock().cancel_countdown();
    }
}

impl std::fmt::Debug for TargetLockController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetLockController")
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}
