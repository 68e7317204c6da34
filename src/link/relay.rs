//! Relay link.
//!
//! A [`RelayLink`] keeps a persistent connection to a fixed relay endpoint
//! and exchanges [`RelayFrame`]s with it. Outbound frames are queued while
//! the connection is down and flushed, in order, once it opens.
//!
//! # Reconnection
//!
//! An unexpected close schedules a reconnect after
//! `base_delay * 2^(attempt - 1)`. A failed attempt schedules the next one
//! until `max_reconnect_attempts` is reached, after which the link stays
//! down until [`RelayLink::reconnect`] or [`RelayLink::connect`] is called.
//! A successful connect resets the attempt counter. [`RelayLink::disconnect`]
//! cancels everything and disables automatic reconnection.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{LinkError, LinkResult};
use super::types::{LinkState, SendOutcome};
use crate::config::RelayConfig;
use crate::location::PeerSample;

/// The two directions of an open relay connection.
///
/// Dropping `outbound` closes the write side; `inbound` yields `None` once
/// the remote end closes.
#[derive(Debug)]
pub struct RelaySocket {
    /// Text frames to write.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Text frames read from the relay.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens connections to a relay endpoint.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Opens a connection to `endpoint`.
    async fn open(&self, endpoint: &str) -> LinkResult<RelaySocket>;
}

/// Position carried by a relay frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelayLocation {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// A frame exchanged with the relay.
///
/// # Wire format
///
/// ```json
/// {"heading":90.0,"location":{"latitude":1.0,"longitude":2.0},"timestamp":1700000000000}
/// ```
///
/// `deviceId` is optional and omitted when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayFrame {
    /// Heading in degrees.
    pub heading: f64,
    /// Position of the sender.
    pub location: RelayLocation,
    /// When the frame was produced (Unix milliseconds).
    pub timestamp: f64,
    /// Sender identifier, if provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl RelayFrame {
    /// Decodes and validates an inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Protocol`] if the text is not a well-formed
    /// frame with numeric heading, timestamp, latitude and longitude.
    pub fn decode(text: &str) -> LinkResult<Self> {
        serde_json::from_str(text).map_err(|e| LinkError::Protocol(e.to_string()))
    }

    /// Encodes the frame for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Protocol`] if serialization fails.
    pub fn encode(&self) -> LinkResult<String> {
        serde_json::to_string(self).map_err(|e| LinkError::Protocol(e.to_string()))
    }

    /// Builds a frame from a complete sample.
    ///
    /// Returns `None` if the sample lacks a heading or a valid position.
    #[must_use]
    pub fn from_sample(sample: &PeerSample) -> Option<Self> {
        let heading = sample.heading()?;
        let position = sample.position()?;
        #[allow(clippy::cast_precision_loss)]
        let timestamp = sample.timestamp_ms as f64;
        Some(Self {
            heading,
            location: RelayLocation {
                latitude: position.latitude,
                longitude: position.longitude,
            },
            timestamp,
            device_id: Some(sample.device_id.clone()),
        })
    }

    /// Converts the frame into a sample, using `fallback_id` when the frame
    /// carries no identifier.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn into_sample(self, fallback_id: &str) -> PeerSample {
        PeerSample {
            device_id: self.device_id.unwrap_or_else(|| fallback_id.to_string()),
            heading: Some(self.heading),
            latitude: Some(self.location.latitude),
            longitude: Some(self.location.longitude),
            timestamp_ms: self.timestamp as i64,
        }
    }
}

type FrameHandler = Arc<dyn Fn(RelayFrame) + Send + Sync>;

#[derive(Default)]
struct RelayState {
    link: LinkState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    queue: VecDeque<RelayFrame>,
    attempts: u32,
    auto_reconnect: bool,
    session: u64,
    on_data: Option<FrameHandler>,
    last_error: Option<String>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl RelayState {
    /// Writes queued frames in order. A failed write puts the frame back at
    /// the front and stops.
    ///
    /// Returns false if the connection refused a write.
    fn flush(&mut self) -> bool {
        while let Some(frame) = self.queue.pop_front() {
            let Some(outbound) = self.outbound.as_ref() else {
                self.queue.push_front(frame);
                return false;
            };
            let text = match frame.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Dropping unencodable relay frame");
                    continue;
                }
            };
            if outbound.send(text).is_err() {
                warn!(queued = self.queue.len() + 1, "Relay write failed, keeping frames queued");
                self.queue.push_front(frame);
                return false;
            }
        }
        true
    }
}

struct RelayShared {
    endpoint: String,
    config: RelayConfig,
    transport: Arc<dyn RelayTransport>,
    state: Mutex<RelayState>,
}

impl Drop for RelayShared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        if let Some(reconnect) = state.reconnect.take() {
            reconnect.abort();
        }
    }
}

/// Persistent, auto-reconnecting link to a relay.
///
/// Cloning shares the link.
///
/// # Example
///
/// ```rust,ignore
/// let relay = RelayLink::new(Arc::new(TcpRelayTransport), RelayConfig::default());
/// relay.connect(|frame| println!("heading {}", frame.heading)).await?;
/// relay.send(&sample);
/// ```
#[derive(Clone)]
pub struct RelayLink {
    shared: Arc<RelayShared>,
}

impl RelayLink {
    /// Creates an idle link to `config.endpoint`.
    #[must_use]
    pub fn new(transport: Arc<dyn RelayTransport>, config: RelayConfig) -> Self {
        Self {
            shared: Arc::new(RelayShared {
                endpoint: config.endpoint.clone(),
                config,
                transport,
                state: Mutex::new(RelayState::default()),
            }),
        }
    }

    fn from_weak(weak: &Weak<RelayShared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    /// The relay endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Connects to the relay, delivering each valid inbound frame to
    /// `on_data`.
    ///
    /// Cancels any pending automatic reconnect and re-enables automatic
    /// reconnection. If the link is already open, only the handler is
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::AlreadyConnecting`] if a connect is in flight,
    /// [`LinkError::Timeout`] if the relay does not open within the connect
    /// timeout, or the transport error. Failures leave the link in `Error`.
    pub async fn connect<F>(&self, on_data: F) -> LinkResult<()>
    where
        F: Fn(RelayFrame) + Send + Sync + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if state.link == LinkState::Connecting {
                return Err(LinkError::AlreadyConnecting);
            }
            if let Some(pending) = state.reconnect.take() {
                pending.abort();
            }
        }
        self.open(Arc::new(on_data)).await
    }

    /// Reconnects with the previously registered handler, resetting the
    /// attempt counter.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotInitialized`] if [`Self::connect`] was never
    /// called, otherwise the same errors as [`Self::connect`].
    pub async fn reconnect(&self) -> LinkResult<()> {
        let handler = {
            let mut state = self.shared.state.lock();
            if state.link == LinkState::Connecting {
                return Err(LinkError::AlreadyConnecting);
            }
            if let Some(pending) = state.reconnect.take() {
                pending.abort();
            }
            state.attempts = 0;
            state.on_data.clone().ok_or(LinkError::NotInitialized)?
        };
        self.open(handler).await
    }

    async fn open(&self, on_data: FrameHandler) -> LinkResult<()> {
        {
            let mut state = self.shared.state.lock();
            state.on_data = Some(on_data);
            state.auto_reconnect = true;
            match state.link {
                LinkState::Connecting => return Err(LinkError::AlreadyConnecting),
                LinkState::Connected => return Ok(()),
                LinkState::Idle | LinkState::Disconnected | LinkState::Error => {
                    state.link = LinkState::Connecting;
                }
            }
        }

        let endpoint = self.shared.endpoint.as_str();
        let budget = self.shared.config.connect_timeout();
        info!(endpoint, "Connecting to relay");

        let socket = match tokio::time::timeout(budget, self.shared.transport.open(endpoint)).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => return Err(self.connect_failed(e)),
            Err(_) => {
                return Err(self.connect_failed(LinkError::Timeout(format!(
                    "relay connect to {endpoint} after {}ms",
                    budget.as_millis()
                ))))
            }
        };

        let RelaySocket { outbound, inbound } = socket;
        let mut state = self.shared.state.lock();
        if state.link != LinkState::Connecting {
            debug!(endpoint, "Relay link torn down while connecting");
            return Err(LinkError::Closed);
        }
        state.session += 1;
        state.link = LinkState::Connected;
        state.last_error = None;
        state.outbound = Some(outbound);
        state.reader = Some(tokio::spawn(read_frames(
            Arc::downgrade(&self.shared),
            state.session,
            inbound,
        )));
        if !state.flush() {
            self.connection_lost(&mut state);
            return Ok(());
        }
        state.attempts = 0;
        info!(endpoint, "Relay connected");
        Ok(())
    }

    fn connect_failed(&self, error: LinkError) -> LinkError {
        warn!(endpoint = %self.shared.endpoint, error = %error, "Relay connect failed");
        let mut state = self.shared.state.lock();
        if state.link == LinkState::Connecting {
            state.link = LinkState::Error;
            state.last_error = Some(error.to_string());
        }
        error
    }

    fn on_closed(&self, session: u64) {
        let mut state = self.shared.state.lock();
        if state.session != session || state.link != LinkState::Connected {
            return;
        }
        warn!(endpoint = %self.shared.endpoint, "Relay connection closed");
        self.connection_lost(&mut state);
    }

    /// Drops the open connection and, unless disabled, schedules a reconnect.
    fn connection_lost(&self, state: &mut RelayState) {
        state.session += 1;
        state.link = LinkState::Disconnected;
        state.outbound = None;
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        if state.auto_reconnect {
            self.schedule_reconnect(state);
        }
    }

    fn schedule_reconnect(&self, state: &mut RelayState) {
        let max = self.shared.config.max_reconnect_attempts;
        if state.attempts >= max {
            warn!(attempts = state.attempts, "Relay reconnect attempts exhausted");
            return;
        }
        state.attempts += 1;
        let delay = backoff_delay(self.shared.config.base_delay(), state.attempts);
        info!(
            attempt = state.attempts,
            max,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling relay reconnect"
        );

        let weak = Arc::downgrade(&self.shared);
        state.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(link) = Self::from_weak(&weak) {
                link.run_reconnect().await;
            }
        }));
    }

    async fn run_reconnect(&self) {
        let handler = {
            let state = self.shared.state.lock();
            if !state.auto_reconnect {
                return;
            }
            match state.on_data.clone() {
                Some(handler) => handler,
                None => return,
            }
        };

        if let Err(e) = self.open(handler).await {
            debug!(error = %e, "Relay reconnect attempt failed");
            let mut state = self.shared.state.lock();
            if state.auto_reconnect && state.link == LinkState::Error {
                self.schedule_reconnect(&mut state);
            }
        }
    }

    fn deliver(&self, session: u64, text: &str) {
        let handler = {
            let state = self.shared.state.lock();
            if state.session != session {
                return;
            }
            state.on_data.clone()
        };
        match RelayFrame::decode(text) {
            Ok(frame) => {
                if let Some(handler) = handler {
                    handler(frame);
                }
            }
            Err(e) => debug!(error = %e, "Dropping invalid relay frame"),
        }
    }

    /// Sends `sample` to the relay.
    ///
    /// The sample is written immediately when connected, otherwise queued.
    /// Samples without a heading or position are dropped.
    pub fn send(&self, sample: &PeerSample) -> SendOutcome {
        match RelayFrame::from_sample(sample) {
            Some(frame) => self.send_frame(frame),
            None => {
                debug!(device_id = %sample.device_id, "Incomplete sample, not relayed");
                SendOutcome::Dropped
            }
        }
    }

    /// Sends a raw frame, queueing it while disconnected.
    pub fn send_frame(&self, frame: RelayFrame) -> SendOutcome {
        let mut state = self.shared.state.lock();
        state.queue.push_back(frame);
        if state.link == LinkState::Connected && !state.flush() {
            self.connection_lost(&mut state);
        }
        if state.queue.is_empty() {
            SendOutcome::Sent
        } else {
            SendOutcome::Queued
        }
    }

    /// Closes the connection, cancels timers, and disables automatic
    /// reconnection. Queued frames are kept for the next connect.
    pub fn disconnect(&self) {
        let mut state = self.shared.state.lock();
        state.auto_reconnect = false;
        state.attempts = self.shared.config.max_reconnect_attempts;
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        if let Some(reconnect) = state.reconnect.take() {
            reconnect.abort();
        }
        state.outbound = None;
        state.session += 1;
        state.link = LinkState::Idle;
        info!(endpoint = %self.shared.endpoint, "Relay disconnected");
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.shared.state.lock().link
    }

    /// Returns true if the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Number of frames waiting for the connection.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Reconnect attempts made since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.state.lock().attempts
    }

    /// Description of the last connect failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().last_error.clone()
    }
}

impl std::fmt::Debug for RelayLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayLink")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Delay before reconnect `attempt` (1-based).
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1 << exponent)
}

async fn read_frames(
    shared: Weak<RelayShared>,
    session: u64,
    mut inbound: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = inbound.recv().await {
        let Some(link) = RelayLink::from_weak(&shared) else {
            return;
        };
        link.deliver(session, &text);
    }
    if let Some(link) = RelayLink::from_weak(&shared) {
        link.on_closed(session);
    }
}
