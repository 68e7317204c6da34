//! Peer links.
//!
//! Two ways of exchanging [`PeerSample`](crate::location::PeerSample)s with a
//! remote device:
//!
//! - [`DirectLink`]: a negotiated peer-to-peer data channel with a single
//!   peer. Signaling (offer, answer, ICE candidates) travels out of band.
//!   Samples are dropped when the channel is not open.
//! - [`RelayLink`]: a persistent connection to a fixed relay endpoint with
//!   a FIFO send queue and bounded exponential-backoff reconnection.
//!
//! Both links are pluggable: [`PeerConnectionFactory`] and [`RelayTransport`]
//! abstract the wire. [`LoopbackNetwork`] and [`TcpRelayTransport`] are the
//! bundled backends.
//!
//! # State machine
//!
//! ```text
//! Idle → Connecting → Connected → Disconnected → Connecting → …
//!            ↓            ↓
//!          Error  ←───────┘
//! ```
//!
//! Any state may fall into `Error`, and an explicit disconnect always
//! returns to `Idle`.

mod direct;
mod error;
mod loopback;
mod relay;
mod tcp;
mod types;

pub use direct::{
    DirectLink, IceCandidate, IceCandidateHandler, PeerConnection, PeerConnectionFactory,
    PeerEvent, Role, SdpKind, SessionDescription,
};
pub use error::{LinkError, LinkResult};
pub use loopback::LoopbackNetwork;
pub use relay::{
    backoff_delay, RelayFrame, RelayLink, RelayLocation, RelaySocket, RelayTransport,
};
pub use tcp::TcpRelayTransport;
pub use types::{LinkSnapshot, LinkState, SendOutcome};
