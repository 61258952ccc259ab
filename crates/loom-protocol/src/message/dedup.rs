//! Inbound message de-duplication (spec.md §3 `InboundDedup`, §4.4.1).
//!
//! A bounded LRU cache per source peer: retried `MsgNotify`/`MsgDeliver`
//! frames for a message id already seen are recognized and re-acked
//! without redoing the work, instead of growing an unbounded set.
//! Grounded on the teacher's `router::Router` dedup cache, swapping its
//! manual TTL-eviction `HashMap` for the `lru` crate (already a declared
//! dependency of the teacher, used here for its stated purpose).
use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::types::{PeerId, DEDUP_CAPACITY};

/// Per-peer bounded history of message ids already seen.
#[derive(Debug)]
pub struct InboundDedup {
    capacity: NonZeroUsize,
    seen: HashMap<PeerId, LruCache<u128, ()>>,
}

impl Default for InboundDedup {
    fn default() -> Self {
        Self::new(DEDUP_CAPACITY)
    }
}

impl InboundDedup {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1"),
            seen: HashMap::new(),
        }
    }

    /// Records `message_id` as seen from `from`. Returns `true` if this is
    /// the first time it's been observed from this peer (i.e. the caller
    /// should process it), `false` if it's a duplicate (the caller should
    /// just re-ack without reprocessing, per spec.md §4.4.1 at-least-once
    /// semantics).
    pub fn observe(&mut self, from: PeerId, message_id: u128) -> bool {
        let cache = self
            .seen
            .entry(from)
            .or_insert_with(|| LruCache::new(self.capacity));
        if cache.contains(&message_id) {
            cache.promote(&message_id);
            false
        } else {
            cache.put(message_id, ());
            true
        }
    }

    /// Non-mutating membership check, used to decide whether a retried
    /// `MsgNotify` should be re-answered with a bare ack instead of
    /// restarting the request/deliver round trip (spec.md §4.4.1).
    pub fn contains(&self, from: &PeerId, message_id: u128) -> bool {
        self.seen
            .get(from)
            .map(|cache| cache.contains(&message_id))
            .unwrap_or(false)
    }

    /// Rehydrate one previously-delivered id on startup, without treating
    /// it as a fresh observation.
    pub fn restore(&mut self, from: PeerId, message_id: u128) {
        self.observe(from, message_id);
    }

    pub fn peer_count(&self) -> usize {
        self.seen.len()
    }
}
