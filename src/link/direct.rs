//! Direct peer-to-peer link.
//!
//! A [`DirectLink`] negotiates an ordered data channel with one remote peer
//! through an offer/answer exchange and trickled ICE candidates. The actual
//! connection machinery lives behind [`PeerConnectionFactory`] so the state
//! machine can run against any backend (see [`super::LoopbackNetwork`]).
//!
//! # Signaling
//!
//! Signaling is out of band. The initiating side calls
//! [`DirectLink::initiate`] and ships the returned offer to the other side,
//! which calls [`DirectLink::join`] and ships the answer back. Both sides
//! forward candidates surfaced through the handler registered with
//! [`DirectLink::set_ice_candidate_handler`].
//!
//! # State
//!
//! Every change is published as a [`LinkSnapshot`] on a watch channel.
//! Faults land in the snapshot as `LinkState::Error`; only signaling calls
//! return errors to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{LinkError, LinkResult};
use super::types::{LinkSnapshot, LinkState, SendOutcome};
use crate::config::DirectLinkConfig;
use crate::location::PeerSample;
use crate::peer::PeerSlot;

/// Kind of session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Produced by the initiating side.
    Offer,
    /// Produced by the joining side in reply to an offer.
    Answer,
}

/// An offer or answer exchanged over the signaling path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Backend-specific session payload.
    pub sdp: String,
}

impl SessionDescription {
    /// Creates an offer description.
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Creates an answer description.
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A connectivity candidate trickled between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to.
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

/// Which side of the negotiation a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the data channel and the offer.
    Initiator,
    /// Answers an offer and receives the data channel.
    Joiner,
}

/// Asynchronous notifications raised by a peer connection backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A local candidate to forward to the remote peer.
    IceCandidate(IceCandidate),
    /// The data channel opened.
    ChannelOpen,
    /// A text payload arrived on the data channel.
    Message(String),
    /// The data channel closed.
    ChannelClosed,
    /// The data channel or connection faulted.
    ChannelError(String),
}

/// One negotiated connection to a remote peer.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Creates an offer. Only valid for [`Role::Initiator`].
    async fn create_offer(&self) -> LinkResult<SessionDescription>;

    /// Creates an answer to the remote offer.
    async fn create_answer(&self) -> LinkResult<SessionDescription>;

    /// Applies the local description.
    async fn set_local_description(&self, description: SessionDescription) -> LinkResult<()>;

    /// Applies the remote description.
    async fn set_remote_description(&self, description: SessionDescription) -> LinkResult<()>;

    /// Adds a remote candidate.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> LinkResult<()>;

    /// Returns the applied local description, if any.
    fn local_description(&self) -> Option<SessionDescription>;

    /// Writes a text payload to the open data channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not open.
    fn send(&self, payload: &str) -> LinkResult<()>;

    /// Closes the connection and its data channel.
    fn close(&self);
}

/// Creates peer connections for a [`DirectLink`].
pub trait PeerConnectionFactory: Send + Sync {
    /// Creates a connection that reports through `events`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unavailable`] if the runtime cannot create
    /// peer connections.
    fn create(
        &self,
        role: Role,
        config: &DirectLinkConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> LinkResult<Arc<dyn PeerConnection>>;
}

/// Callback invoked with each local ICE candidate.
pub type IceCandidateHandler = Arc<dyn Fn(IceCandidate) + Send + Sync>;

struct Session {
    generation: u64,
    room_id: String,
    role: Role,
    connection: Arc<dyn PeerConnection>,
    pump: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

impl Session {
    fn teardown(self) {
        self.pump.abort();
        self.watchdog.abort();
        self.connection.close();
    }
}

struct Shared {
    snapshot: watch::Sender<LinkSnapshot>,
    active: Mutex<Option<Session>>,
    on_ice_candidate: Mutex<Option<IceCandidateHandler>>,
    remote: PeerSlot,
    next_generation: AtomicU64,
}

impl Shared {
    fn state(&self) -> LinkState {
        self.snapshot.borrow().state
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    fn set_state(&self, next: LinkState) -> bool {
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.state == next {
                return false;
            }
            if !snapshot.state.can_transition_to(next) {
                warn!(from = ?snapshot.state, to = ?next, "Ignoring illegal link transition");
                return false;
            }
            snapshot.state = next;
            true
        })
    }

    fn record_error(&self, error: &LinkError) {
        warn!(error = %error, "Direct link failed");
        self.snapshot.send_modify(|snapshot| {
            snapshot.state = LinkState::Error;
            snapshot.error = Some(error.to_string());
            snapshot.remote = None;
        });
    }

    /// Tears down the session if it is still `generation` and records `error`.
    fn fail(&self, generation: u64, error: &LinkError) {
        let session = {
            let mut active = self.active.lock();
            if active.as_ref().is_some_and(|s| s.generation == generation) {
                active.take()
            } else {
                None
            }
        };
        let Some(session) = session else {
            return;
        };
        session.teardown();
        self.remote.clear();
        self.record_error(error);
    }

    /// Applies one backend event. Returns false once the session is gone.
    fn handle_event(&self, generation: u64, event: PeerEvent) -> bool {
        if !self.is_current(generation) {
            return false;
        }

        match event {
            PeerEvent::IceCandidate(candidate) => {
                let handler = self.on_ice_candidate.lock().clone();
                match handler {
                    Some(handler) => handler(candidate),
                    None => debug!("No ICE candidate handler registered, dropping candidate"),
                }
            }
            PeerEvent::ChannelOpen => {
                if self.set_state(LinkState::Connected) {
                    info!("Direct link connected");
                }
            }
            PeerEvent::Message(text) => match PeerSample::from_json(&text) {
                Ok(sample) => {
                    self.remote.set(sample.clone());
                    self.snapshot.send_modify(|s| s.remote = Some(sample));
                }
                Err(e) => warn!(error = %e, "Dropping malformed direct-link payload"),
            },
            PeerEvent::ChannelClosed => {
                if self.state() != LinkState::Connected {
                    self.fail(generation, &LinkError::Closed);
                    return false;
                }
                self.remote.clear();
                self.snapshot.send_modify(|s| {
                    s.state = LinkState::Disconnected;
                    s.remote = None;
                });
                info!("Direct link disconnected");
            }
            PeerEvent::ChannelError(reason) => {
                self.fail(generation, &LinkError::Transport(reason));
                return false;
            }
        }
        true
    }
}

async fn pump_events(
    shared: Weak<Shared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if !shared.handle_event(generation, event) {
            break;
        }
    }
}

async fn negotiation_watchdog(shared: Weak<Shared>, generation: u64, budget: Duration) {
    tokio::time::sleep(budget).await;
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let state = shared.state();
    if state == LinkState::Connecting {
        shared.fail(
            generation,
            &LinkError::Timeout(format!(
                "direct link negotiation after {}ms",
                budget.as_millis()
            )),
        );
    }
}

/// Direct data-channel link to a single remote peer.
///
/// # Example
///
/// ```rust,ignore
/// let network = LoopbackNetwork::new();
/// let alice = DirectLink::new(Arc::new(network.clone()), DirectLinkConfig::default());
/// let bob = DirectLink::new(Arc::new(network), DirectLinkConfig::default());
///
/// let offer = alice.initiate("room-1").await?;
/// let answer = bob.join("room-1", offer).await?;
/// alice.accept_answer(answer).await?;
/// ```
pub struct DirectLink {
    shared: Arc<Shared>,
    factory: Arc<dyn PeerConnectionFactory>,
    config: DirectLinkConfig,
}

impl DirectLink {
    /// Creates an idle link backed by `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn PeerConnectionFactory>, config: DirectLinkConfig) -> Self {
        let (snapshot, _) = watch::channel(LinkSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                snapshot,
                active: Mutex::new(None),
                on_ice_candidate: Mutex::new(None),
                remote: PeerSlot::new(),
                next_generation: AtomicU64::new(0),
            }),
            factory,
            config,
        }
    }

    /// Registers the callback that forwards local ICE candidates to the
    /// signaling path, replacing any previous one.
    pub fn set_ice_candidate_handler<F>(&self, handler: F)
    where
        F: Fn(IceCandidate) + Send + Sync + 'static,
    {
        *self.shared.on_ice_candidate.lock() = Some(Arc::new(handler));
    }

    /// Removes the ICE candidate callback.
    pub fn clear_ice_candidate_handler(&self) {
        *self.shared.on_ice_candidate.lock() = None;
    }

    /// Starts a session as the initiating side and returns the offer.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::AlreadyConnecting`] or
    /// [`LinkError::AlreadyConnected`] if a session is in flight, or the
    /// backend error if the offer cannot be produced. Backend errors also
    /// move the link to `Error`.
    pub async fn initiate(&self, room_id: &str) -> LinkResult<SessionDescription> {
        let (generation, connection) = self.begin(room_id, Role::Initiator)?;
        info!(room_id, "Initiating direct link");

        let result: LinkResult<SessionDescription> = async {
            let offer = connection.create_offer().await?;
            connection.set_local_description(offer.clone()).await?;
            Ok(offer)
        }
        .await;
        self.settle(generation, result)
    }

    /// Starts a session as the joining side and returns the answer to `offer`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::initiate`]; additionally returns
    /// [`LinkError::Negotiation`] if `offer` is not an offer.
    pub async fn join(
        &self,
        room_id: &str,
        offer: SessionDescription,
    ) -> LinkResult<SessionDescription> {
        let (generation, connection) = self.begin(room_id, Role::Joiner)?;
        info!(room_id, "Joining direct link");

        let result: LinkResult<SessionDescription> = async {
            if offer.kind != SdpKind::Offer {
                return Err(LinkError::Negotiation("expected an offer".to_string()));
            }
            connection.set_remote_description(offer).await?;
            let answer = connection.create_answer().await?;
            connection.set_local_description(answer.clone()).await?;
            Ok(answer)
        }
        .await;
        self.settle(generation, result)
    }

    /// Applies the remote answer on the initiating side.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotInitialized`] if no session exists, or
    /// [`LinkError::Negotiation`] if this side did not initiate or
    /// `answer` is not an answer.
    pub async fn accept_answer(&self, answer: SessionDescription) -> LinkResult<()> {
        let (generation, role, connection) = self.current()?;
        let result = async {
            if role != Role::Initiator {
                return Err(LinkError::Negotiation(
                    "answer received by the joining side".to_string(),
                ));
            }
            if answer.kind != SdpKind::Answer {
                return Err(LinkError::Negotiation("expected an answer".to_string()));
            }
            connection.set_remote_description(answer).await
        }
        .await;
        self.settle(generation, result)
    }

    /// Adds a candidate received from the remote peer.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotInitialized`] if no session exists, or the
    /// backend error if the candidate is rejected.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> LinkResult<()> {
        let (generation, _, connection) = self.current()?;
        let result = connection.add_ice_candidate(candidate).await;
        self.settle(generation, result)
    }

    /// Returns the local description of the current session.
    #[must_use]
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.shared
            .active
            .lock()
            .as_ref()
            .and_then(|s| s.connection.local_description())
    }

    /// Returns the room identifier of the current session.
    #[must_use]
    pub fn room_id(&self) -> Option<String> {
        self.shared.active.lock().as_ref().map(|s| s.room_id.clone())
    }

    /// Sends `sample` to the remote peer.
    ///
    /// Returns [`SendOutcome::Dropped`] unless the channel is open; the
    /// direct link never buffers.
    pub fn send(&self, sample: &PeerSample) -> SendOutcome {
        let connection = {
            let active = self.shared.active.lock();
            match active.as_ref() {
                Some(session) if self.shared.state() == LinkState::Connected => {
                    Arc::clone(&session.connection)
                }
                _ => {
                    debug!("Direct link not open, dropping sample");
                    return SendOutcome::Dropped;
                }
            }
        };

        let payload = match sample.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode sample");
                return SendOutcome::Dropped;
            }
        };

        match connection.send(&payload) {
            Ok(()) => {
                let sample = sample.clone();
                self.shared.snapshot.send_modify(|s| s.local = Some(sample));
                SendOutcome::Sent
            }
            Err(e) => {
                warn!(error = %e, "Direct link send failed");
                SendOutcome::Dropped
            }
        }
    }

    /// Closes the session and returns to `Idle`, clearing all peer data.
    pub fn disconnect(&self) {
        let session = self.shared.active.lock().take();
        if let Some(session) = session {
            info!(room_id = %session.room_id, "Closing direct link");
            session.teardown();
        }
        self.shared.remote.clear();
        self.shared
            .snapshot
            .send_modify(|s| *s = LinkSnapshot::default());
    }

    /// Subscribes to snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LinkSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> LinkSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    /// Returns true if the data channel is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Returns the slot holding the latest remote sample.
    #[must_use]
    pub fn remote_slot(&self) -> PeerSlot {
        self.shared.remote.clone()
    }

    fn begin(&self, room_id: &str, role: Role) -> LinkResult<(u64, Arc<dyn PeerConnection>)> {
        let mut active = self.shared.active.lock();
        match self.shared.state() {
            LinkState::Connecting => return Err(LinkError::AlreadyConnecting),
            LinkState::Connected => return Err(LinkError::AlreadyConnected),
            LinkState::Idle | LinkState::Disconnected | LinkState::Error => {}
        }
        if let Some(previous) = active.take() {
            previous.teardown();
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = match self.factory.create(role, &self.config, events_tx) {
            Ok(connection) => connection,
            Err(e) => {
                drop(active);
                self.shared.record_error(&e);
                return Err(e);
            }
        };

        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.remote.clear();
        self.shared.snapshot.send_modify(|s| {
            *s = LinkSnapshot {
                state: LinkState::Connecting,
                ..LinkSnapshot::default()
            };
        });

        let weak = Arc::downgrade(&self.shared);
        let pump = tokio::spawn(pump_events(weak.clone(), generation, events_rx));
        let watchdog = tokio::spawn(negotiation_watchdog(
            weak,
            generation,
            self.config.negotiation_timeout(),
        ));

        *active = Some(Session {
            generation,
            room_id: room_id.to_string(),
            role,
            connection: Arc::clone(&connection),
            pump,
            watchdog,
        });
        Ok((generation, connection))
    }

    fn current(&self) -> LinkResult<(u64, Role, Arc<dyn PeerConnection>)> {
        self.shared
            .active
            .lock()
            .as_ref()
            .map(|s| (s.generation, s.role, Arc::clone(&s.connection)))
            .ok_or(LinkError::NotInitialized)
    }

    fn settle<T>(&self, generation: u64, result: LinkResult<T>) -> LinkResult<T> {
        if let Err(error) = &result {
            self.shared.fail(generation, error);
        }
        result
    }
}

impl Drop for DirectLink {
    fn drop(&mut self) {
        if let Some(session) = self.shared.active.lock().take() {
            session.teardown();
        }
    }
}

impl std::fmt::Debug for DirectLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectLink")
            .field("state", &self.state())
            .field("room_id", &self.room_id())
            .finish_non_exhaustive()
    }
}
