//! Discovery engine (spec.md §4.3, C5): heartbeats, profile refresh,
//! online checks, and recursive peer-list expansion.
//!
//! Like [`crate::peer_table`], this is pure logic — no network, no clock
//! reads beyond the `now` passed in by the caller. [`DiscoveryEngine`]
//! owns only its own timers/trackers; the peer table and local profile
//! live in the node actor and are passed in by reference, mirroring the
//! teacher's `runtime::state::RuntimeState` composing independent
//! sub-trackers rather than one another.
pub mod expansion;
pub mod heartbeat;
pub mod online_check;

use serde::{Deserialize, Serialize};

use crate::error::MeshError;
use crate::peer_table::{PeerPatch, PeerRecord, PeerTable};
use crate::types::PeerId;

pub use expansion::ExpansionState;
pub use heartbeat::HeartbeatScheduler;
pub use online_check::{CheckResult, OnlineCheckTracker};

/// An effect the discovery engine wants performed. The node actor
/// translates these into actual `Frame`s (filling in `from`) and hands
/// them to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryAction {
    SendHeartbeat { to: PeerId, payload: Vec<u8> },
    SendProfileRequest { to: PeerId },
    SendOnlineCheck { to: PeerId, payload: Vec<u8> },
    SendOnlineAck { to: PeerId, payload: Vec<u8> },
    SendDeviceListRequest { to: PeerId },
    SendDeviceListResponse { to: PeerId, payload: Vec<u8> },
    /// A tracked online check timed out with no ack.
    OnlineCheckTimedOut { peer: PeerId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub profile_version: u64,
}

impl HeartbeatPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec_named(self).expect("HeartbeatPayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MeshError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoncePayload {
    pub nonce: u64,
}

impl NoncePayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec_named(self).expect("NoncePayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MeshError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// One row of a `DeviceListResponse` (spec.md §4.3.3): enough to let the
/// recipient upsert the peer without a round trip, same as the teacher's
/// `PeerAnnounce` summary record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub peer_id: PeerId,
    pub name: String,
    pub profile_version: u64,
}

impl From<&PeerRecord> for PeerSummary {
    fn from(record: &PeerRecord) -> Self {
        Self {
            peer_id: record.peer_id.clone(),
            name: record.name.clone(),
            profile_version: record.profile_version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceListResponsePayload {
    pub peers: Vec<PeerSummary>,
}

impl DeviceListResponsePayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec_named(self).expect("DeviceListResponsePayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MeshError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Composition of the discovery sub-trackers plus the per-tick scheduling
/// logic that ties them together.
#[derive(Debug, Default)]
pub struct DiscoveryEngine {
    pub heartbeat: HeartbeatScheduler,
    pub online_checks: OnlineCheckTracker,
    pub expansion: ExpansionState,
}

impl DiscoveryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Periodic work: broadcast a heartbeat if due, advance the expansion
    /// frontier, and reap timed-out online checks. Called once per
    /// runtime tick (spec.md §5).
    pub fn tick(
        &mut self,
        now: u64,
        local_profile_version: u64,
        peers: &PeerTable,
    ) -> Vec<DiscoveryAction> {
        let mut actions = Vec::new();

        if self.heartbeat.due(now) {
            let payload = HeartbeatPayload {
                profile_version: local_profile_version,
            }
            .to_bytes();
            for peer_id in peers.ids() {
                actions.push(DiscoveryAction::SendHeartbeat {
                    to: peer_id.clone(),
                    payload: payload.clone(),
                });
            }
            self.heartbeat.mark_sent(now);
        }

        for peer in self.expansion.next_batch() {
            actions.push(DiscoveryAction::SendDeviceListRequest { to: peer });
        }

        for peer in self.online_checks.sweep_timeouts(now) {
            actions.push(DiscoveryAction::OnlineCheckTimedOut { peer });
        }

        actions
    }

    /// Seed (or reset and reseed) the recursive expansion walk from the
    /// peers currently known, and concurrently start an online check
    /// against every one of them — used on startup and on an explicit
    /// refresh. spec.md §4.3.4 defines refresh as both of these firing
    /// together, including against peers currently offline ("this is how
    /// re-join is detected").
    pub fn refresh(&mut self, peers: &PeerTable, now: u64) -> Vec<DiscoveryAction> {
        self.expansion.reset();
        self.expansion.start(peers.ids().cloned());

        let peer_ids: Vec<PeerId> = peers.ids().cloned().collect();
        peer_ids
            .into_iter()
            .map(|peer| self.start_online_check(peer, now, now))
            .collect()
    }

    /// Inbound `Heartbeat{profileVersion}` from `from`. Always touches the
    /// peer table; additionally requests a profile refresh if the
    /// advertised version is newer than what's cached.
    pub fn handle_heartbeat(
        &self,
        from: PeerId,
        remote_version: u64,
        peers: &mut PeerTable,
        now: u64,
    ) -> Vec<DiscoveryAction> {
        let cached_version = peers.get(&from).map(|p| p.profile_version).unwrap_or(0);
        peers.upsert(from.clone(), PeerPatch::with_heartbeat(now));

        let outcome = heartbeat::evaluate_heartbeat(remote_version, cached_version);
        if outcome.needs_profile_refresh {
            vec![DiscoveryAction::SendProfileRequest { to: from }]
        } else {
            Vec::new()
        }
    }

    /// Inbound `ProfileResponse`: the caller has already decoded the
    /// snapshot; this just turns it into a peer-table patch (version
    /// monotonicity is enforced by [`PeerTable::upsert`] itself).
    pub fn apply_profile_response(
        &self,
        from: PeerId,
        name: String,
        avatar: Option<Vec<u8>>,
        version: u64,
        peers: &mut PeerTable,
    ) {
        peers.upsert(from, PeerPatch::with_profile(name, avatar, version));
    }

    pub fn start_online_check(&mut self, to: PeerId, nonce: u64, now: u64) -> DiscoveryAction {
        self.online_checks.start(to.clone(), nonce, now);
        DiscoveryAction::SendOnlineCheck {
            to,
            payload: NoncePayload { nonce }.to_bytes(),
        }
    }

    pub fn handle_online_check(&self, from: PeerId, nonce: u64) -> DiscoveryAction {
        DiscoveryAction::SendOnlineAck {
            to: from,
            payload: NoncePayload { nonce }.to_bytes(),
        }
    }

    pub fn handle_online_ack(&mut self, from: &PeerId, nonce: u64, now: u64) -> Option<CheckResult> {
        self.online_checks.complete(from, nonce, now)
    }

    pub fn handle_device_list_request(&self, from: PeerId, peers: &PeerTable) -> DiscoveryAction {
        let summaries: Vec<PeerSummary> = peers
            .snapshot_excluding(&from)
            .iter()
            .map(PeerSummary::from)
            .collect();
        DiscoveryAction::SendDeviceListResponse {
            to: from,
            payload: DeviceListResponsePayload { peers: summaries }.to_bytes(),
        }
    }

    /// Inbound `DeviceListResponse`: fold newly-reported peers into both
    /// the expansion frontier and the peer table, then request their
    /// lists in turn (spec.md §4.3.3 recursive expansion).
    pub fn handle_device_list_response(
        &mut self,
        reported: Vec<PeerSummary>,
        peers: &mut PeerTable,
        now: u64,
    ) -> Vec<DiscoveryAction> {
        let ids: Vec<PeerId> = reported.iter().map(|s| s.peer_id.clone()).collect();
        let fresh = self.expansion.handle_response(ids);

        for summary in &reported {
            if fresh.contains(&summary.peer_id) {
                peers.upsert(
                    summary.peer_id.clone(),
                    PeerPatch {
                        name: Some(summary.name.clone()),
                        profile_version: Some(summary.profile_version),
                        last_heartbeat: Some(now),
                        first_discovered: Some(now),
                        ..Default::default()
                    },
                );
            }
        }

        fresh
            .into_iter()
            .map(|to| DiscoveryAction::SendDeviceListRequest { to })
            .collect()
    }
}
