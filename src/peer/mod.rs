//! Peer bookkeeping and local discovery.
//!
//! # Architecture
//!
//! ```text
//! LocalDiscovery ──(DiscoveryBus)──► receive loop ──► PeerRegistry ◄── eviction timer
//!       ▲                                                  │
//!   LocalFix (watch)                                       ▼
//!                                             PeerSource (navigation reads)
//! ```
//!
//! The registry is the only structure written from more than one task;
//! its lock serializes those writes while navigation reads concurrently.
//! One-to-one links publish into a [`PeerSlot`] instead.

mod device_id;
mod discovery;
mod registry;
mod slot;
mod types;

pub use device_id::{generate_device_id, DEVICE_ID_LEN};
pub use discovery::{DiscoveryBus, DiscoveryStatus, LocalDiscovery};
pub use registry::{PeerRegistry, DEFAULT_PEER_TTL_MS};
pub use slot::{PeerSlot, PeerSource};
pub use types::{DiscoveryMessage, PeerRegistryEntry};
