//! Single-peer data slots and the lookup seam navigation reads through.

use std::sync::Arc;

use parking_lot::RwLock;

use super::registry::PeerRegistry;
use crate::location::PeerSample;

/// Anything navigation can ask for a peer's latest sample.
pub trait PeerSource: Send + Sync {
    /// The latest sample known for `device_id`.
    fn latest(&self, device_id: &str) -> Option<PeerSample>;
}

impl PeerSource for PeerRegistry {
    fn latest(&self, device_id: &str) -> Option<PeerSample> {
        self.lookup(device_id).map(|entry| entry.sample)
    }
}

/// Holds the most recent sample from a one-to-one link.
///
/// Cloning yields another handle to the same slot.
#[derive(Debug, Clone, Default)]
pub struct PeerSlot {
    inner: Arc<RwLock<Option<PeerSample>>>,
}

impl PeerSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored sample.
    pub fn set(&self, sample: PeerSample) {
        *self.inner.write() = Some(sample);
    }

    /// Empties the slot.
    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// The stored sample, if any.
    #[must_use]
    pub fn get(&self) -> Option<PeerSample> {
        self.inner.read().clone()
    }
}

impl PeerSource for PeerSlot {
    fn latest(&self, device_id: &str) -> Option<PeerSample> {
        self.get().filter(|s| s.device_id == device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> PeerSample {
        PeerSample {
            device_id: id.to_string(),
            heading: None,
            latitude: Some(0.0),
            longitude: Some(0.0),
            timestamp_ms: 1,
        }
    }

    #[test]
    fn slot_clones_share_state() {
        let slot = PeerSlot::new();
        let handle = slot.clone();
        slot.set(sample("A"));
        assert_eq!(handle.get().unwrap().device_id, "A");

        handle.clear();
        assert!(slot.get().is_none());
    }

    #[test]
    fn slot_source_matches_device_id() {
        let slot = PeerSlot::new();
        slot.set(sample("A"));
        assert!(slot.latest("A").is_some());
        assert!(slot.latest("B").is_none());
    }

    #[test]
    fn registry_source_looks_up_entries() {
        let registry = PeerRegistry::new("ME");
        registry.upsert_at(sample("A"), 5);
        assert_eq!(PeerSource::latest(&registry, "A"), Some(sample("A")));
        assert!(PeerSource::latest(&registry, "B").is_none());
    }
}
