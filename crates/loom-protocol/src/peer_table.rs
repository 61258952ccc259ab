//! Peer table (spec.md §3 `PeerRecord`, §4.2, C4).
//!
//! Pure state machine, no I/O. Grounded on the teacher's `relay::Topology`:
//! a flat `HashMap` keyed by id, upserts that merge rather than replace,
//! and a derived-not-stored `online` flag recomputed against the clock on
//! every read rather than cached.
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{now_ms, PeerId, ONLINE_WINDOW_MS, PEER_EVICTION_AGE_MS};

/// Everything the table knows about one remote peer.
///
/// `online` is *not* a stored field on the wire — spec.md §4.2 defines it
/// as `now - lastHeartbeat <= H_online`, so storing it would immediately
/// go stale. [`PeerRecord::online`] computes it on demand; the persisted
/// form (see `persistence::PeerRow`) keeps only the fields that are true
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub name: String,
    pub avatar: Option<Vec<u8>>,
    pub profile_version: u64,
    pub first_discovered: u64,
    pub last_heartbeat: u64,
}

impl PeerRecord {
    /// A freshly-seen peer with minimal metadata (spec.md §7 `UnknownPeer`
    /// handling: implicit upsert on first inbound frame).
    pub fn minimal(peer_id: PeerId, now: u64) -> Self {
        Self {
            peer_id,
            name: String::new(),
            avatar: None,
            profile_version: 0,
            first_discovered: now,
            last_heartbeat: now,
        }
    }

    pub fn is_online_at(&self, now: u64) -> bool {
        now.saturating_sub(self.last_heartbeat) <= ONLINE_WINDOW_MS
    }

    pub fn online(&self) -> bool {
        self.is_online_at(now_ms())
    }
}

/// A partial update applied by [`PeerTable::upsert`]. Any `None` field is
/// left unchanged on the existing record (or defaulted, for a new one).
#[derive(Debug, Clone, Default)]
pub struct PeerPatch {
    pub name: Option<String>,
    pub avatar: Option<Option<Vec<u8>>>,
    pub profile_version: Option<u64>,
    pub last_heartbeat: Option<u64>,
    pub first_discovered: Option<u64>,
}

impl PeerPatch {
    pub fn with_profile(name: String, avatar: Option<Vec<u8>>, version: u64) -> Self {
        Self {
            name: Some(name),
            avatar: Some(avatar),
            profile_version: Some(version),
            ..Default::default()
        }
    }

    pub fn with_heartbeat(ts: u64) -> Self {
        Self {
            last_heartbeat: Some(ts),
            ..Default::default()
        }
    }

    pub fn with_first_discovered(ts: u64) -> Self {
        Self {
            first_discovered: Some(ts),
            ..Default::default()
        }
    }
}

/// Indexed set of known remote peers (spec.md §4.2).
///
/// A single-writer structure: the node actor is the only mutator, so no
/// internal locking is needed. `snapshot()` returns an owned `Vec`, safe
/// to hand to a reader without blocking the next write (spec.md §4.2
/// concurrency note).
/// Peer ids touched since the last [`PeerTable::take_dirty`] flush
/// (spec.md §4.7: "dirty-set flushed on the cache-cleanup tick" rather
/// than a write on every single mutation).
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PeerId, PeerRecord>,
    dirty: HashSet<PeerId>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `patch` into the record for `peer_id`, creating it if absent.
    ///
    /// If `patch.profile_version` is present and not strictly greater than
    /// the cached value, the profile fields (`name`, `avatar`,
    /// `profile_version`) in the patch are ignored — spec.md §4.2: "if
    /// `patch.profileVersion > existing.profileVersion`, supersedes cached
    /// profile fields." Non-profile fields (heartbeat, first_discovered)
    /// still apply even when the profile part is stale.
    pub fn upsert(&mut self, peer_id: PeerId, patch: PeerPatch) -> &PeerRecord {
        let now = now_ms();
        let entry = self
            .peers
            .entry(peer_id.clone())
            .or_insert_with(|| PeerRecord::minimal(peer_id.clone(), now));

        let profile_is_fresher = match patch.profile_version {
            Some(v) => v > entry.profile_version,
            None => false,
        };

        if profile_is_fresher {
            if let Some(name) = patch.name {
                entry.name = name;
            }
            if let Some(avatar) = patch.avatar {
                entry.avatar = avatar;
            }
            entry.profile_version = patch.profile_version.unwrap();
        }

        if let Some(ts) = patch.last_heartbeat {
            entry.last_heartbeat = entry.last_heartbeat.max(ts);
        }
        if let Some(ts) = patch.first_discovered {
            // first_discovered never moves forward once set.
            entry.first_discovered = entry.first_discovered.min(ts);
        }

        self.dirty.insert(peer_id.clone());
        self.peers.get(&peer_id).expect("just inserted")
    }

    /// Drain the dirty set, returning the current record for every peer
    /// touched since the last flush (skipping any since removed). Called
    /// once per tick to batch-persist (spec.md §4.7).
    pub fn take_dirty(&mut self) -> Vec<PeerRecord> {
        self.dirty
            .drain()
            .filter_map(|id| self.peers.get(&id).cloned())
            .collect()
    }

    /// Record a heartbeat timestamp, taking the max with the existing
    /// value (spec.md §4.2 `touch`). Creates the peer if unknown.
    pub fn touch(&mut self, peer_id: PeerId, ts: u64) {
        self.upsert(peer_id, PeerPatch::with_heartbeat(ts));
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn is_online(&self, peer_id: &PeerId) -> bool {
        self.is_online_at(peer_id, now_ms())
    }

    pub fn is_online_at(&self, peer_id: &PeerId, now: u64) -> bool {
        self.peers
            .get(peer_id)
            .map(|p| p.is_online_at(now))
            .unwrap_or(false)
    }

    /// Remove peers whose last heartbeat is older than
    /// [`PEER_EVICTION_AGE_MS`]. Returns the removed ids (spec.md §4.2
    /// `sweep`, §3 eviction rule — "never garbage-collected while online"
    /// is automatically satisfied since online peers are, by definition,
    /// far inside the eviction window).
    pub fn sweep(&mut self, now: u64) -> Vec<PeerId> {
        let mut removed = Vec::new();
        self.peers.retain(|id, record| {
            let stale = now.saturating_sub(record.last_heartbeat) > PEER_EVICTION_AGE_MS;
            if stale {
                removed.push(id.clone());
            }
            !stale
        });
        for id in &removed {
            self.dirty.remove(id);
        }
        removed
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.dirty.remove(peer_id);
        self.peers.remove(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// All known peer ids.
    pub fn ids(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.keys()
    }

    /// Immutable snapshot ordered by `last_heartbeat` descending, tie-broken
    /// by `peer_id` ascending (spec.md §4.2 `snapshot`).
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.peers.values().cloned().collect();
        records.sort_by(|a, b| {
            b.last_heartbeat
                .cmp(&a.last_heartbeat)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        records
    }

    /// Snapshot excluding one peer (used to answer `DeviceListRequest`
    /// without echoing the requester back to itself, spec.md §4.3.3).
    pub fn snapshot_excluding(&self, exclude: &PeerId) -> Vec<PeerRecord> {
        self.snapshot()
            .into_iter()
            .filter(|p| &p.peer_id != exclude)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        PeerId::from(s)
    }

    #[test]
    fn upsert_creates_new_record() {
        let mut table = PeerTable::new();
        table.upsert(id("alice"), PeerPatch::with_heartbeat(1000));
        assert!(table.contains(&id("alice")));
        assert_eq!(table.get(&id("alice")).unwrap().last_heartbeat, 1000);
    }

    #[test]
    fn upsert_profile_requires_strictly_greater_version() {
        let mut table = PeerTable::new();
        table.upsert(
            id("alice"),
            PeerPatch::with_profile("Alice".into(), None, 5),
        );
        // Equal version: ignored
        table.upsert(
            id("alice"),
            PeerPatch::with_profile("AliceStale".into(), None, 5),
        );
        assert_eq!(table.get(&id("alice")).unwrap().name, "Alice");

        // Lower version: ignored
        table.upsert(
            id("alice"),
            PeerPatch::with_profile("Older".into(), None, 3),
        );
        assert_eq!(table.get(&id("alice")).unwrap().name, "Alice");

        // Higher version: applied
        table.upsert(
            id("alice"),
            PeerPatch::with_profile("Alice2".into(), None, 6),
        );
        assert_eq!(table.get(&id("alice")).unwrap().name, "Alice2");
        assert_eq!(table.get(&id("alice")).unwrap().profile_version, 6);
    }

    #[test]
    fn touch_takes_max_of_timestamps() {
        let mut table = PeerTable::new();
        table.touch(id("alice"), 1000);
        table.touch(id("alice"), 500); // older, should not regress
        assert_eq!(table.get(&id("alice")).unwrap().last_heartbeat, 1000);
        table.touch(id("alice"), 2000);
        assert_eq!(table.get(&id("alice")).unwrap().last_heartbeat, 2000);
    }

    #[test]
    fn is_online_reflects_heartbeat_window() {
        let mut table = PeerTable::new();
        table.touch(id("alice"), 1_000_000);

        assert!(table.is_online_at(&id("alice"), 1_000_000));
        assert!(table.is_online_at(&id("alice"), 1_000_000 + ONLINE_WINDOW_MS));
        assert!(!table.is_online_at(&id("alice"), 1_000_000 + ONLINE_WINDOW_MS + 1));
    }

    #[test]
    fn unknown_peer_is_not_online() {
        let table = PeerTable::new();
        assert!(!table.is_online(&id("ghost")));
    }

    #[test]
    fn sweep_evicts_peers_older_than_eviction_age() {
        let mut table = PeerTable::new();
        table.touch(id("old"), 0);
        table.touch(id("fresh"), PEER_EVICTION_AGE_MS);

        let now = PEER_EVICTION_AGE_MS + 1;
        let removed = table.sweep(now);

        assert_eq!(removed, vec![id("old")]);
        assert!(!table.contains(&id("old")));
        assert!(table.contains(&id("fresh")));
    }

    #[test]
    fn sweep_boundary_is_exclusive() {
        let mut table = PeerTable::new();
        table.touch(id("exact"), 0);
        // now - lastHeartbeat == PEER_EVICTION_AGE_MS, not > it: must survive.
        let removed = table.sweep(PEER_EVICTION_AGE_MS);
        assert!(removed.is_empty());
        assert!(table.contains(&id("exact")));
    }

    #[test]
    fn snapshot_orders_by_last_heartbeat_desc_then_id_asc() {
        let mut table = PeerTable::new();
        table.touch(id("zed"), 100);
        table.touch(id("alice"), 300);
        table.touch(id("bob"), 300); // tie with alice, broken by id
        table.touch(id("carl"), 200);

        let snap = table.snapshot();
        let ids: Vec<&str> = snap.iter().map(|p| p.peer_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob", "carl", "zed"]);
    }

    #[test]
    fn snapshot_excluding_filters_one_peer() {
        let mut table = PeerTable::new();
        table.touch(id("alice"), 100);
        table.touch(id("bob"), 200);

        let snap = table.snapshot_excluding(&id("bob"));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].peer_id, id("alice"));
    }

    #[test]
    fn first_discovered_never_moves_forward() {
        let mut table = PeerTable::new();
        table.upsert(id("alice"), PeerPatch::with_first_discovered(500));
        table.upsert(id("alice"), PeerPatch::with_first_discovered(1000));
        assert_eq!(table.get(&id("alice")).unwrap().first_discovered, 500);
    }

    #[test]
    fn take_dirty_drains_touched_peers_and_clears() {
        let mut table = PeerTable::new();
        table.touch(id("alice"), 100);
        table.touch(id("bob"), 200);

        let dirty = table.take_dirty();
        let ids: Vec<&str> = dirty.iter().map(|p| p.peer_id.as_str()).collect();
        assert!(ids.contains(&"alice"));
        assert!(ids.contains(&"bob"));
        assert!(table.take_dirty().is_empty());
    }

    #[test]
    fn sweep_drops_evicted_peers_from_the_dirty_set() {
        let mut table = PeerTable::new();
        table.touch(id("ghost"), 0);
        table.sweep(PEER_EVICTION_AGE_MS + 1);
        assert!(table.take_dirty().is_empty());
    }

    #[test]
    fn remove_deletes_record() {
        let mut table = PeerTable::new();
        table.touch(id("alice"), 100);
        let removed = table.remove(&id("alice"));
        assert!(removed.is_some());
        assert!(table.is_empty());
    }
}
