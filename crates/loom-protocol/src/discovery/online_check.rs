//! Nonce-based online check (spec.md §4.3.2).
//!
//! A node that wants to confirm a peer is actually reachable right now
//! (rather than just "heartbeat seen within the last 10 minutes") sends an
//! `OnlineCheck{nonce}` and expects `OnlineAck{nonce}` back within
//! [`ONLINE_CHECK_TIMEOUT_MS`]. Pure bookkeeping here; the transport call
//! and the RNG for the nonce live in the runtime layer.
use std::collections::HashMap;

use crate::types::{PeerId, ONLINE_CHECK_TIMEOUT_MS};

#[derive(Debug, Clone, Copy)]
struct PendingCheck {
    nonce: u64,
    sent_at: u64,
}

/// Outcome of a completed or timed-out check, surfaced to the caller for
/// logging / metrics (spec.md §4.3.2: RTT is informational only, it does
/// not feed back into liveness — heartbeat is the liveness signal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    pub rtt_ms: u64,
}

/// Tracks outstanding online checks, one per peer at a time (a second
/// check for the same peer replaces the first rather than queuing).
#[derive(Debug, Default)]
pub struct OnlineCheckTracker {
    pending: HashMap<PeerId, PendingCheck>,
}

impl OnlineCheckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking a check sent to `peer` with the given `nonce`.
    pub fn start(&mut self, peer: PeerId, nonce: u64, now: u64) {
        self.pending.insert(peer, PendingCheck { nonce, sent_at: now });
    }

    /// Record an inbound `OnlineAck`. Returns `Some(CheckResult)` if it
    /// matches an outstanding check for that peer with the same nonce
    /// (stale or mismatched acks are silently ignored, per spec.md §7
    /// "unexpected protocol message" handling).
    pub fn complete(&mut self, peer: &PeerId, nonce: u64, now: u64) -> Option<CheckResult> {
        let pending = self.pending.get(peer)?;
        if pending.nonce != nonce {
            return None;
        }
        let rtt_ms = now.saturating_sub(pending.sent_at);
        self.pending.remove(peer);
        Some(CheckResult { rtt_ms })
    }

    /// Remove and return peers whose outstanding check has exceeded the
    /// timeout without an ack (spec.md §4.3.2: counts as "not currently
    /// reachable", distinct from eviction from the peer table).
    pub fn sweep_timeouts(&mut self, now: u64) -> Vec<PeerId> {
        let mut timed_out = Vec::new();
        self.pending.retain(|peer, check| {
            let expired = now.saturating_sub(check.sent_at) > ONLINE_CHECK_TIMEOUT_MS;
            if expired {
                timed_out.push(peer.clone());
            }
            !expired
        });
        timed_out
    }

    pub fn is_pending(&self, peer: &PeerId) -> bool {
        self.pending.contains_key(peer)
    }
}
