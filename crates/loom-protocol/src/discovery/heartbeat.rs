//! Heartbeat scheduling (spec.md §4.3.1).
//!
//! Pure timer logic: decides *when* a heartbeat broadcast is due and what
//! to do with an inbound one. Grounded on the teacher's
//! `discovery::heartbeat::HeartbeatTracker`, simplified from per-peer
//! liveness bookkeeping (which lives in [`crate::peer_table`] here) down
//! to just the broadcast cadence and the profile-refresh trigger.
use crate::types::HEARTBEAT_INTERVAL_MS;

/// Tracks when the next outbound heartbeat broadcast is due.
#[derive(Debug, Default)]
pub struct HeartbeatScheduler {
    last_broadcast: Option<u64>,
}

impl HeartbeatScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `HEARTBEAT_INTERVAL_MS` has elapsed since the last
    /// broadcast, or immediately on first call (spec.md §4.3.1: the node
    /// announces itself as soon as it starts).
    pub fn due(&self, now: u64) -> bool {
        match self.last_broadcast {
            None => true,
            Some(last) => now.saturating_sub(last) >= HEARTBEAT_INTERVAL_MS,
        }
    }

    pub fn mark_sent(&mut self, now: u64) {
        self.last_broadcast = Some(now);
    }
}

/// Outcome of receiving a peer's heartbeat: whether we need to fetch its
/// profile because the version it advertised is newer than what we have
/// cached (spec.md §4.3.1 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    pub needs_profile_refresh: bool,
}

/// Decide whether a heartbeat's advertised `remote_version` warrants a
/// `ProfileRequest` follow-up against the cached version we hold.
pub fn evaluate_heartbeat(remote_version: u64, cached_version: u64) -> HeartbeatOutcome {
    HeartbeatOutcome {
        needs_profile_refresh: remote_version > cached_version,
    }
}
