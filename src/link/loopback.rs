//! In-process peer connection backend.
//!
//! [`LoopbackNetwork`] pairs an initiating and a joining connection created
//! from the same network. Descriptions carry the endpoint id, so the usual
//! offer/answer exchange is what links the two ends. The channel opens when
//! the initiator applies the answer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::direct::{
    IceCandidate, PeerConnection, PeerConnectionFactory, PeerEvent, Role, SdpKind,
    SessionDescription,
};
use super::error::{LinkError, LinkResult};
use crate::config::DirectLinkConfig;

const SDP_PREFIX: &str = "loopback:";

struct Endpoint {
    events: mpsc::UnboundedSender<PeerEvent>,
    peer: Option<u64>,
    open: bool,
}

#[derive(Default)]
struct NetworkState {
    next_id: u64,
    endpoints: HashMap<u64, Endpoint>,
}

impl NetworkState {
    fn notify(&self, id: u64, event: PeerEvent) {
        if let Some(endpoint) = self.endpoints.get(&id) {
            if endpoint.events.send(event).is_err() {
                debug!(id, "Loopback endpoint has no listener, event dropped");
            }
        }
    }
}

/// An in-memory network of peer connections.
///
/// Cloning shares the network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.state.lock().endpoints.len()
    }
}

impl PeerConnectionFactory for LoopbackNetwork {
    fn create(
        &self,
        role: Role,
        config: &DirectLinkConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> LinkResult<Arc<dyn PeerConnection>> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.endpoints.insert(
            id,
            Endpoint {
                events,
                peer: None,
                open: false,
            },
        );
        debug!(id, ?role, label = %config.channel_label, "Created loopback endpoint");

        Ok(Arc::new(LoopbackConnection {
            id,
            role,
            network: Arc::clone(&self.state),
            local: Mutex::new(None),
            remote: Mutex::new(None),
        }))
    }
}

fn endpoint_id(description: &SessionDescription) -> LinkResult<u64> {
    description
        .sdp
        .strip_prefix(SDP_PREFIX)
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| LinkError::Negotiation(format!("unrecognized sdp: {}", description.sdp)))
}

struct LoopbackConnection {
    id: u64,
    role: Role,
    network: Arc<Mutex<NetworkState>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
}

impl LoopbackConnection {
    fn description(&self, kind: SdpKind) -> SessionDescription {
        SessionDescription {
            kind,
            sdp: format!("{SDP_PREFIX}{}", self.id),
        }
    }

    fn open_with(&self, peer_id: u64) -> LinkResult<()> {
        let mut state = self.network.lock();
        let peer = state
            .endpoints
            .get_mut(&peer_id)
            .ok_or_else(|| LinkError::Negotiation("answering peer is gone".to_string()))?;
        if peer.peer != Some(self.id) {
            return Err(LinkError::Negotiation(
                "answer does not belong to this offer".to_string(),
            ));
        }
        peer.open = true;
        if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
            endpoint.peer = Some(peer_id);
            endpoint.open = true;
        }
        state.notify(self.id, PeerEvent::ChannelOpen);
        state.notify(peer_id, PeerEvent::ChannelOpen);
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn create_offer(&self) -> LinkResult<SessionDescription> {
        if self.role != Role::Initiator {
            return Err(LinkError::Negotiation(
                "only the initiator creates offers".to_string(),
            ));
        }
        Ok(self.description(SdpKind::Offer))
    }

    async fn create_answer(&self) -> LinkResult<SessionDescription> {
        if self.remote.lock().is_none() {
            return Err(LinkError::Negotiation(
                "cannot answer before the offer is applied".to_string(),
            ));
        }
        Ok(self.description(SdpKind::Answer))
    }

    async fn set_local_description(&self, description: SessionDescription) -> LinkResult<()> {
        *self.local.lock() = Some(description);
        self.network.lock().notify(
            self.id,
            PeerEvent::IceCandidate(IceCandidate {
                candidate: format!("candidate:loopback {} host", self.id),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            }),
        );
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> LinkResult<()> {
        let peer_id = endpoint_id(&description)?;
        match description.kind {
            SdpKind::Offer => {
                let mut state = self.network.lock();
                if !state.endpoints.contains_key(&peer_id) {
                    return Err(LinkError::Negotiation("offering peer is gone".to_string()));
                }
                if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
                    endpoint.peer = Some(peer_id);
                }
            }
            SdpKind::Answer => self.open_with(peer_id)?,
        }
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> LinkResult<()> {
        if self.remote.lock().is_none() {
            return Err(LinkError::Negotiation(
                "remote description not set".to_string(),
            ));
        }
        debug!(id = self.id, candidate = %candidate.candidate, "Loopback candidate accepted");
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    fn send(&self, payload: &str) -> LinkResult<()> {
        let state = self.network.lock();
        let peer = state
            .endpoints
            .get(&self.id)
            .filter(|endpoint| endpoint.open)
            .and_then(|endpoint| endpoint.peer)
            .ok_or_else(|| LinkError::Transport("data channel not open".to_string()))?;
        let target = state
            .endpoints
            .get(&peer)
            .ok_or_else(|| LinkError::Transport("peer closed".to_string()))?;
        target
            .events
            .send(PeerEvent::Message(payload.to_string()))
            .map_err(|_| LinkError::Transport("peer closed".to_string()))
    }

    fn close(&self) {
        let mut state = self.network.lock();
        let Some(endpoint) = state.endpoints.remove(&self.id) else {
            return;
        };
        if let Some(peer_id) = endpoint.peer {
            if let Some(peer) = state.endpoints.get_mut(&peer_id) {
                if peer.open {
                    peer.open = false;
                    if peer.events.send(PeerEvent::ChannelClosed).is_err() {
                        debug!(id = peer_id, "Loopback peer has no listener for close");
                    }
                }
            }
        }
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        self.close();
    }
}
