//! Types shared by the direct and relay links.

use crate::location::PeerSample;

/// Connection state of a link.
///
/// Transitions only move forward, except for the reconnect loop
/// `Connected → Disconnected → Connecting`, retries out of `Error`,
/// any state `→ Error`, and an explicit teardown `→ Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    /// Not connected and not trying to.
    #[default]
    Idle,
    /// Negotiating or opening the connection.
    Connecting,
    /// Open and exchanging data.
    Connected,
    /// A fault occurred; see the link's last error.
    Error,
    /// The connection closed after being open.
    Disconnected,
}

impl LinkState {
    /// Returns true if `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Error | Self::Idle)
                | (Self::Idle | Self::Disconnected | Self::Error, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connected, Self::Disconnected)
        )
    }
}

/// What happened to an outbound sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the open connection.
    Sent,
    /// Buffered until the connection opens.
    Queued,
    /// Discarded.
    Dropped,
}

/// Observable state of the direct link, published on every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkSnapshot {
    /// Current state.
    pub state: LinkState,
    /// Most recent sample received from the remote peer.
    pub remote: Option<PeerSample>,
    /// Most recent sample sent to the remote peer.
    pub local: Option<PeerSample>,
    /// Description of the last fault.
    pub error: Option<String>,
}
