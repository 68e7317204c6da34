//! Registry of known peers with time-to-live eviction.

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use super::types::PeerRegistryEntry;
use crate::location::{now_ms, PeerSample};

/// Default time a silent peer stays in the registry.
pub const DEFAULT_PEER_TTL_MS: i64 = 30_000;

/// The set of peers this device has heard from recently.
///
/// Mutated by the discovery receive path and the eviction timer; read
/// concurrently by navigation. All access goes through an internal lock.
/// The local device is never stored.
///
/// Every change bumps a revision published on [`subscribe`](Self::subscribe).
///
/// Times are Unix milliseconds taken from a clock anchored at construction
/// and advanced by [`tokio::time::Instant`], so a paused test clock drives
/// eviction.
#[derive(Debug)]
pub struct PeerRegistry {
    local_device_id: String,
    entries: RwLock<Vec<PeerRegistryEntry>>,
    revision: watch::Sender<u64>,
    anchor: Instant,
    anchor_ms: i64,
}

impl PeerRegistry {
    /// Creates an empty registry for the device `local_device_id`.
    #[must_use]
    pub fn new(local_device_id: impl Into<String>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            local_device_id: local_device_id.into(),
            entries: RwLock::new(Vec::new()),
            revision,
            anchor: Instant::now(),
            anchor_ms: now_ms(),
        }
    }

    /// Current time on the registry clock (Unix milliseconds).
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.anchor_ms.saturating_add(elapsed)
    }

    /// Subscribes to the revision counter, bumped on every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// The id this registry refuses to store.
    #[must_use]
    pub fn local_device_id(&self) -> &str {
        &self.local_device_id
    }

    /// Inserts or replaces the entry for `sample.device_id`, seen now.
    ///
    /// Returns `false` if the sample came from the local device.
    pub fn upsert(&self, sample: PeerSample) -> bool {
        self.upsert_at(sample, self.now_ms())
    }

    /// Inserts or replaces the entry for `sample.device_id`, seen at `now_ms`.
    ///
    /// Returns `false` if the sample came from the local device.
    pub fn upsert_at(&self, sample: PeerSample, now_ms: i64) -> bool {
        if sample.device_id == self.local_device_id {
            return false;
        }

        let mut entries = self.entries.write();
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.sample.device_id == sample.device_id)
        {
            entry.sample = sample;
            entry.last_seen_ms = now_ms;
        } else {
            info!(peer = %sample.device_id, "Discovered peer");
            entries.push(PeerRegistryEntry {
                sample,
                last_seen_ms: now_ms,
            });
        }
        drop(entries);
        self.bump();
        true
    }

    /// Removes every entry not seen within `ttl_ms` of `now_ms`.
    ///
    /// Returns the ids that were evicted.
    pub fn evict_stale(&self, now_ms: i64, ttl_ms: i64) -> Vec<String> {
        let mut evicted = Vec::new();
        self.entries.write().retain(|entry| {
            let keep = now_ms.saturating_sub(entry.last_seen_ms) <= ttl_ms;
            if !keep {
                evicted.push(entry.sample.device_id.clone());
            }
            keep
        });

        for id in &evicted {
            debug!(peer = %id, "Evicted stale peer");
        }
        if !evicted.is_empty() {
            self.bump();
        }
        evicted
    }

    /// Removes every entry not seen within `ttl_ms` of the registry clock.
    pub fn evict_expired(&self, ttl_ms: i64) -> Vec<String> {
        self.evict_stale(self.now_ms(), ttl_ms)
    }

    /// All entries in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PeerRegistryEntry> {
        self.entries.read().clone()
    }

    /// The entry for `device_id`, if present.
    #[must_use]
    pub fn lookup(&self, device_id: &str) -> Option<PeerRegistryEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.sample.device_id == device_id)
            .cloned()
    }

    /// Number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no peers are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forgets every peer.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        if entries.is_empty() {
            return;
        }
        entries.clear();
        drop(entries);
        self.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, heading: f64) -> PeerSample {
        PeerSample {
            device_id: id.to_string(),
            heading: Some(heading),
            latitude: Some(1.0),
            longitude: Some(1.0),
            timestamp_ms: 0,
        }
    }

    #[test]
    fn upsert_inserts_new_peer() {
        let registry = PeerRegistry::new("ME");
        assert!(registry.upsert_at(sample("A", 10.0), 1_000));

        let entry = registry.lookup("A").unwrap();
        assert_eq!(entry.last_seen_ms, 1_000);
        assert_eq!(entry.device_id(), "A");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn upsert_replaces_existing_peer() {
        let registry = PeerRegistry::new("ME");
        registry.upsert_at(sample("A", 10.0), 1_000);
        registry.upsert_at(sample("A", 20.0), 2_000);

        let entry = registry.lookup("A").unwrap();
        assert_eq!(entry.sample.heading, Some(20.0));
        assert_eq!(entry.last_seen_ms, 2_000);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn upsert_rejects_local_device() {
        let registry = PeerRegistry::new("ME");
        assert!(!registry.upsert_at(sample("ME", 10.0), 1_000));
        assert!(registry.is_empty());
        assert!(registry.lookup("ME").is_none());
    }

    #[test]
    fn evict_removes_entry_past_ttl() {
        let registry = PeerRegistry::new("ME");
        registry.upsert_at(sample("X", 0.0), 10_000);

        let evicted = registry.evict_stale(10_000 + DEFAULT_PEER_TTL_MS + 1, DEFAULT_PEER_TTL_MS);
        assert_eq!(evicted, vec!["X".to_string()]);
        assert!(registry.lookup("X").is_none());
    }

    #[test]
    fn evict_retains_entry_within_ttl() {
        let registry = PeerRegistry::new("ME");
        registry.upsert_at(sample("X", 0.0), 10_000);

        let evicted = registry.evict_stale(10_000 + DEFAULT_PEER_TTL_MS - 1, DEFAULT_PEER_TTL_MS);
        assert!(evicted.is_empty());
        assert!(registry.lookup("X").is_some());
    }

    #[test]
    fn evict_retains_entry_exactly_at_ttl() {
        let registry = PeerRegistry::new("ME");
        registry.upsert_at(sample("X", 0.0), 10_000);
        registry.evict_stale(10_000 + DEFAULT_PEER_TTL_MS, DEFAULT_PEER_TTL_MS);
        assert!(registry.lookup("X").is_some());
    }

    #[test]
    fn refresh_postpones_eviction() {
        let registry = PeerRegistry::new("ME");
        registry.upsert_at(sample("X", 0.0), 0);
        registry.upsert_at(sample("X", 0.0), 25_000);

        registry.evict_stale(40_000, DEFAULT_PEER_TTL_MS);
        assert!(registry.lookup("X").is_some());
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let registry = PeerRegistry::new("ME");
        registry.upsert_at(sample("B", 0.0), 1);
        registry.upsert_at(sample("A", 0.0), 2);
        registry.upsert_at(sample("C", 0.0), 3);
        registry.upsert_at(sample("B", 5.0), 4);

        let ids: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|e| e.device_id().to_string())
            .collect();
        assert_eq!(ids, ["B", "A", "C"]);
    }

    #[test]
    fn clear_forgets_all_peers() {
        let registry = PeerRegistry::new("ME");
        registry.upsert_at(sample("A", 0.0), 1);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn changes_bump_the_revision() {
        let registry = PeerRegistry::new("ME");
        let mut revisions = registry.subscribe();

        registry.upsert_at(sample("A", 0.0), 1_000);
        assert!(revisions.has_changed().unwrap());
        assert_eq!(*revisions.borrow_and_update(), 1);

        registry.upsert_at(sample("ME", 0.0), 1_000);
        registry.evict_stale(1_000, DEFAULT_PEER_TTL_MS);
        assert!(!revisions.has_changed().unwrap());

        registry.evict_stale(1_000 + DEFAULT_PEER_TTL_MS + 1, DEFAULT_PEER_TTL_MS);
        assert_eq!(*revisions.borrow_and_update(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn registry_clock_follows_tokio_time() {
        let registry = PeerRegistry::new("ME");
        registry.upsert(sample("A", 0.0));

        tokio::time::advance(std::time::Duration::from_millis(30_000)).await;
        assert!(registry.evict_expired(DEFAULT_PEER_TTL_MS).is_empty());

        tokio::time::advance(std::time::Duration::from_millis(2)).await;
        assert_eq!(registry.evict_expired(DEFAULT_PEER_TTL_MS), vec!["A".to_string()]);
    }

    #[test]
    fn concurrent_upserts_and_reads() {
        use std::sync::Arc;

        let registry = Arc::new(PeerRegistry::new("ME"));
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        registry.upsert_at(sample(&format!("P{t}-{}", i % 5), 0.0), i);
                        let _ = registry.snapshot();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(registry.len(), 20);
    }
}
