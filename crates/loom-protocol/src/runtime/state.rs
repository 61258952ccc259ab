//! Pure node logic (spec.md §4.8, C10): owns every sub-component's state
//! and turns inputs (ticks, inbound frames, user commands) into
//! [`NodeEffect`]s without doing any I/O itself.
//!
//! Grounded on the teacher's `runtime::state::RuntimeState`: one struct
//! composing independent trackers, a `tick` entry point and a family of
//! `handle_*` entry points, all returning `Vec<RuntimeEffect>`.
use crate::discovery::{DiscoveryAction, DiscoveryEngine, DeviceListResponsePayload, HeartbeatPayload, NoncePayload, PeerSummary};
use crate::frame::Frame;
use crate::message::{DeliverPayload, MessageAction, MessageEngine};
use crate::metrics::NodeMetrics;
use crate::peer_table::PeerTable;
use crate::profile::LocalProfile;
use crate::relay::{RelayDecision, RelayEnvelope, RelayService};
use crate::runtime::effect::NodeEffect;
use crate::runtime::NodeEvent;
use crate::types::{FrameType, PeerId, Stage};

use tracing::warn;

/// Everything one mesh node knows about itself and the peers around it.
pub struct NodeState {
    pub local_id: PeerId,
    pub profile: LocalProfile,
    pub peers: PeerTable,
    pub discovery: DiscoveryEngine,
    pub messages: MessageEngine,
    pub relay: RelayService,
    pub metrics: NodeMetrics,
}

impl NodeState {
    pub fn new(local_id: PeerId, profile: LocalProfile) -> Self {
        Self {
            local_id,
            profile,
            peers: PeerTable::new(),
            discovery: DiscoveryEngine::new(),
            messages: MessageEngine::new(),
            relay: RelayService::new(),
            metrics: NodeMetrics::new(),
        }
    }

    /// Rehydrate from persisted peers on startup (spec.md §4.7). Only
    /// reseeds the expansion frontier, not a full refresh — the peers just
    /// loaded from disk already have a `last_heartbeat`, so the normal
    /// heartbeat/eviction machinery picks up their liveness without an
    /// immediate online-check burst against every restored peer.
    pub fn restore_peers(&mut self, peers: Vec<crate::peer_table::PeerRecord>) {
        for peer in peers {
            self.peers.upsert(
                peer.peer_id.clone(),
                crate::peer_table::PeerPatch {
                    name: Some(peer.name),
                    avatar: Some(peer.avatar),
                    profile_version: Some(peer.profile_version),
                    last_heartbeat: Some(peer.last_heartbeat),
                    first_discovered: Some(peer.first_discovered),
                },
            );
        }
        self.discovery.expansion.reset();
        self.discovery.expansion.start(self.peers.ids().cloned());
        self.peers.take_dirty(); // restoring from storage isn't a fresh write
    }

    fn send(&self, to: PeerId, frame_type: FrameType, payload: Vec<u8>) -> NodeEffect {
        NodeEffect::SendFrame(Frame::new(frame_type, self.local_id.clone(), to, payload))
    }

    fn send_staged(
        &self,
        to: PeerId,
        frame_type: FrameType,
        message_id: u128,
        stage: Stage,
        payload: Vec<u8>,
    ) -> NodeEffect {
        NodeEffect::SendFrame(Frame::new_staged(
            frame_type,
            self.local_id.clone(),
            to,
            message_id,
            stage,
            payload,
        ))
    }

    fn discovery_action_to_effect(&mut self, action: DiscoveryAction) -> NodeEffect {
        match action {
            DiscoveryAction::SendHeartbeat { to, payload } => {
                self.metrics.heartbeats_sent.inc();
                self.send(to, FrameType::Heartbeat, payload)
            }
            DiscoveryAction::SendProfileRequest { to } => {
                self.send(to, FrameType::ProfileRequest, Vec::new())
            }
            DiscoveryAction::SendOnlineCheck { to, payload } => {
                self.metrics.online_checks_started.inc();
                self.send(to, FrameType::OnlineCheck, payload)
            }
            DiscoveryAction::SendOnlineAck { to, payload } => {
                self.send(to, FrameType::OnlineAck, payload)
            }
            DiscoveryAction::SendDeviceListRequest { to } => {
                self.send(to, FrameType::DeviceListRequest, Vec::new())
            }
            DiscoveryAction::SendDeviceListResponse { to, payload } => {
                self.send(to, FrameType::DeviceListResponse, payload)
            }
            DiscoveryAction::OnlineCheckTimedOut { peer } => {
                self.metrics.online_checks_timed_out.inc();
                NodeEffect::EmitEvent(NodeEvent::OnlineCheckTimedOut { peer })
            }
        }
    }

    fn message_action_to_effect(&mut self, action: MessageAction) -> NodeEffect {
        match action {
            MessageAction::SendNotify { to, message_id } => {
                self.send_staged(to, FrameType::MsgNotify, message_id, Stage::Notified, Vec::new())
            }
            MessageAction::SendRequest { to, message_id } => {
                self.send_staged(to, FrameType::MsgRequest, message_id, Stage::Requested, Vec::new())
            }
            MessageAction::SendDeliver {
                to,
                message_id,
                payload,
            } => self.send_staged(to, FrameType::MsgDeliver, message_id, Stage::Requested, payload),
            MessageAction::SendAck { to, message_id } => {
                self.send_staged(to, FrameType::MsgAck, message_id, Stage::Delivered, Vec::new())
            }
            MessageAction::GaveUp { to, message_id } => {
                self.metrics.messages_failed.inc();
                NodeEvent::MessageFailed { to, message_id }.into()
            }
        }
    }

    /// Periodic work: heartbeats, expansion fan-out, online-check sweeps,
    /// message retries, peer table eviction.
    pub fn tick(&mut self, now: u64) -> Vec<NodeEffect> {
        let mut effects = Vec::new();

        let discovery_actions = self.discovery.tick(now, self.profile.version, &self.peers);
        for action in discovery_actions {
            effects.push(self.discovery_action_to_effect(action));
        }

        let message_actions = self.messages.tick(now);
        for action in message_actions {
            let message_id = message_action_id(&action);
            effects.push(self.message_action_to_effect(action));
            // Resend/GaveUp both move the outbox entry's stage or retry
            // count forward; re-persist so a restart doesn't replay a
            // stale attempt count or resurrect a message already failed
            // (spec.md §4.4.2: "on every stage transition, persist the
            // outbox record atomically").
            if let Some(id) = message_id {
                if let Some(record) = self.messages.outbox.get(id) {
                    effects.push(NodeEffect::PersistOutbound(record.clone()));
                }
            }
        }

        let evicted = self.peers.sweep(now);
        for peer in evicted {
            effects.push(NodeEffect::RemovePersistedPeer(peer));
        }

        let dirty = self.peers.take_dirty();
        if !dirty.is_empty() {
            effects.push(NodeEffect::PersistPeersBatch(dirty));
        }

        effects
    }

    /// Dispatch a decoded inbound frame to the owning sub-component.
    pub fn handle_frame(&mut self, frame: Frame, now: u64) -> Vec<NodeEffect> {
        match frame.frame_type {
            FrameType::Heartbeat => match HeartbeatPayload::from_bytes(&frame.payload) {
                Ok(hb) => {
                    self.metrics.heartbeats_received.inc();
                    self.discovery
                        .handle_heartbeat(frame.from, hb.profile_version, &mut self.peers, now)
                        .into_iter()
                        .map(|a| self.discovery_action_to_effect(a))
                        .collect()
                }
                Err(e) => {
                    warn!(from = %frame.from, error = %e, "dropping malformed heartbeat");
                    Vec::new()
                }
            },
            FrameType::ProfileRequest => {
                let payload = self.profile.snapshot().to_bytes();
                vec![self.send(frame.from, FrameType::ProfileResponse, payload)]
            }
            FrameType::ProfileResponse => {
                match crate::profile::ProfileSnapshot::from_bytes(&frame.payload) {
                    Ok(snap) => {
                        self.discovery.apply_profile_response(
                            frame.from,
                            snap.name,
                            snap.avatar,
                            snap.version,
                            &mut self.peers,
                        );
                        Vec::new()
                    }
                    Err(e) => {
                        warn!(from = %frame.from, error = %e, "dropping malformed profile response");
                        Vec::new()
                    }
                }
            }
            FrameType::OnlineCheck => match NoncePayload::from_bytes(&frame.payload) {
                Ok(nonce) => {
                    let action = self.discovery.handle_online_check(frame.from, nonce.nonce);
                    vec![self.discovery_action_to_effect(action)]
                }
                Err(e) => {
                    warn!(from = %frame.from, error = %e, "dropping malformed online check");
                    Vec::new()
                }
            },
            FrameType::OnlineAck => match NoncePayload::from_bytes(&frame.payload) {
                Ok(nonce) => {
                    if let Some(result) = self.discovery.handle_online_ack(&frame.from, nonce.nonce, now) {
                        vec![NodeEffect::EmitEvent(NodeEvent::PeerOnline {
                            peer: frame.from,
                            rtt_ms: result.rtt_ms,
                        })]
                    } else {
                        Vec::new()
                    }
                }
                Err(e) => {
                    warn!(from = %frame.from, error = %e, "dropping malformed online ack");
                    Vec::new()
                }
            },
            FrameType::DeviceListRequest => {
                let action = self.discovery.handle_device_list_request(frame.from, &self.peers);
                vec![self.discovery_action_to_effect(action)]
            }
            FrameType::DeviceListResponse => match DeviceListResponsePayload::from_bytes(&frame.payload) {
                Ok(payload) => {
                    let fresh_peers: Vec<PeerSummary> = payload.peers;
                    let actions = self
                        .discovery
                        .handle_device_list_response(fresh_peers, &mut self.peers, now);
                    self.metrics.peers_discovered.inc_by(actions.len() as u64);
                    actions
                        .into_iter()
                        .map(|a| self.discovery_action_to_effect(a))
                        .collect()
                }
                Err(e) => {
                    warn!(from = %frame.from, error = %e, "dropping malformed device list response");
                    Vec::new()
                }
            },
            FrameType::MsgNotify => {
                let Some(message_id) = frame.message_id else {
                    warn!(from = %frame.from, "MsgNotify missing messageId");
                    return Vec::new();
                };
                let is_new_peer = !self.peers.contains(&frame.from);
                let action = self.messages.handle_notify(frame.from, message_id, &mut self.peers);
                if is_new_peer {
                    self.metrics.peers_discovered.inc();
                }
                vec![self.message_action_to_effect(action)]
            }
            FrameType::MsgRequest => {
                let Some(message_id) = frame.message_id else {
                    warn!(from = %frame.from, "MsgRequest missing messageId");
                    return Vec::new();
                };
                let actions = self.messages.handle_request(message_id);
                let mut effects: Vec<NodeEffect> = actions
                    .into_iter()
                    .map(|a| self.message_action_to_effect(a))
                    .collect();
                // `handle_request` advances the outbox entry to `Requested`;
                // persist that transition too (spec.md §4.4.2).
                if let Some(record) = self.messages.outbox.get(message_id) {
                    effects.push(NodeEffect::PersistOutbound(record.clone()));
                }
                effects
            }
            FrameType::MsgDeliver => {
                let Some(message_id) = frame.message_id else {
                    warn!(from = %frame.from, "MsgDeliver missing messageId");
                    return Vec::new();
                };
                match DeliverPayload::from_bytes(&frame.payload) {
                    Ok(payload) => {
                        let from = frame.from.clone();
                        let (ack, delivered) =
                            self.messages.handle_deliver(frame.from, message_id, payload.kind, payload.body);
                        let mut effects = vec![self.message_action_to_effect(ack)];
                        if let Some(delivered) = delivered {
                            self.metrics.messages_delivered.inc();
                            effects.push(NodeEffect::PersistDelivered { from, message_id });
                            effects.push(NodeEffect::EmitEvent(NodeEvent::MessageDelivered(delivered)));
                        }
                        effects
                    }
                    Err(e) => {
                        warn!(from = %frame.from, error = %e, "dropping malformed deliver");
                        Vec::new()
                    }
                }
            }
            FrameType::MsgAck => {
                let Some(message_id) = frame.message_id else {
                    warn!(from = %frame.from, "MsgAck missing messageId");
                    return Vec::new();
                };
                self.messages.handle_ack(message_id);
                vec![NodeEffect::DeleteOutbound(message_id)]
            }
            FrameType::Relay => match RelayEnvelope::from_bytes(&frame.payload) {
                Ok(envelope) => match self.relay.handle_relay_frame(envelope) {
                    RelayDecision::Forward { to, inner } => {
                        self.metrics.relay_forwarded.inc();
                        vec![NodeEffect::SendFrame(Frame::new(FrameType::Relay, self.local_id.clone(), to, inner))]
                    }
                    RelayDecision::Dropped => {
                        self.metrics.relay_dropped.inc();
                        warn!(from = %frame.from, "dropping relay frame: relaying disabled");
                        Vec::new()
                    }
                },
                Err(e) => {
                    warn!(from = %frame.from, error = %e, "dropping malformed relay envelope");
                    Vec::new()
                }
            },
            FrameType::Unknown => {
                warn!(from = %frame.from, "dropping unrecognized frame type");
                Vec::new()
            }
        }
    }

    pub fn set_profile(&mut self, name: Option<String>, avatar: Option<Option<Vec<u8>>>) -> Vec<NodeEffect> {
        self.profile.set(name, avatar);
        vec![
            NodeEffect::PersistProfile(self.profile.clone()),
            NodeEffect::EmitEvent(NodeEvent::ProfileUpdated {
                version: self.profile.version,
            }),
        ]
    }

    pub fn send_message(
        &mut self,
        message_id: u128,
        to: PeerId,
        kind: crate::types::MessageKind,
        body: Vec<u8>,
        now: u64,
    ) -> Vec<NodeEffect> {
        let persisted = crate::message::OutboundMessage::new(message_id, to.clone(), kind, body.clone(), now);
        let action = self.messages.send(message_id, to, kind, body, now);
        self.metrics.messages_sent.inc();
        vec![
            NodeEffect::PersistOutbound(persisted),
            self.message_action_to_effect(action),
        ]
    }

    pub fn set_relay_enabled(&mut self, enabled: bool) -> Vec<NodeEffect> {
        self.relay.set_enabled(enabled);
        vec![NodeEffect::EmitEvent(NodeEvent::RelayModeChanged { enabled })]
    }

    pub fn request_online_check(&mut self, peer: PeerId, nonce: u64, now: u64) -> Vec<NodeEffect> {
        let action = self.discovery.start_online_check(peer, nonce, now);
        vec![self.discovery_action_to_effect(action)]
    }

    /// Kick off an explicit refresh (spec.md §4.3.4): reseed the recursive
    /// expansion walk *and* start an online check against every known peer
    /// (including offline ones — this is how re-join is detected).
    pub fn refresh_discovery(&mut self, now: u64) -> Vec<NodeEffect> {
        self.discovery
            .refresh(&self.peers, now)
            .into_iter()
            .map(|a| self.discovery_action_to_effect(a))
            .collect()
    }
}

fn message_action_id(action: &MessageAction) -> Option<u128> {
    match action {
        MessageAction::SendNotify { message_id, .. }
        | MessageAction::SendRequest { message_id, .. }
        | MessageAction::SendDeliver { message_id, .. }
        | MessageAction::SendAck { message_id, .. }
        | MessageAction::GaveUp { message_id, .. } => Some(*message_id),
    }
}

impl From<NodeEvent> for NodeEffect {
    fn from(event: NodeEvent) -> Self {
        NodeEffect::EmitEvent(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageKind;

    fn id(s: &str) -> PeerId {
        PeerId::from(s)
    }

    fn state(local: &str) -> NodeState {
        NodeState::new(id(local), LocalProfile::new(local))
    }

    #[test]
    fn send_message_persists_then_emits_notify() {
        let mut node = state("alice");
        let effects = node.send_message(1, id("bob"), MessageKind::Text, b"hi".to_vec(), 0);
        assert!(matches!(effects[0], NodeEffect::PersistOutbound(_)));
        assert!(matches!(effects[1], NodeEffect::SendFrame(_)));
    }

    #[test]
    fn handle_heartbeat_frame_may_trigger_profile_request() {
        let mut node = state("alice");
        let frame = Frame::new(
            FrameType::Heartbeat,
            id("bob"),
            id("alice"),
            HeartbeatPayload { profile_version: 3 }.to_bytes(),
        );
        let effects = node.handle_frame(frame, 0);
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            NodeEffect::SendFrame(f) => assert_eq!(f.frame_type, FrameType::ProfileRequest),
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[test]
    fn handle_unknown_frame_type_is_a_noop() {
        let mut node = state("alice");
        let frame = Frame::new(FrameType::Unknown, id("bob"), id("alice"), vec![]);
        assert!(node.handle_frame(frame, 0).is_empty());
    }

    #[test]
    fn set_profile_emits_persist_and_event() {
        let mut node = state("alice");
        let effects = node.set_profile(Some("alice2".into()), None);
        assert!(matches!(effects[0], NodeEffect::PersistProfile(_)));
        assert!(matches!(
            effects[1],
            NodeEffect::EmitEvent(NodeEvent::ProfileUpdated { .. })
        ));
    }

    #[test]
    fn relay_frame_forwarded_only_when_enabled() {
        let mut node = state("alice");
        let envelope = RelayEnvelope {
            to: id("carol"),
            inner: vec![9],
        };
        let frame = Frame::new(FrameType::Relay, id("bob"), id("alice"), envelope.to_bytes());

        let effects = node.handle_frame(frame.clone(), 0);
        assert!(effects.is_empty()); // disabled by default

        node.set_relay_enabled(true);
        let effects = node.handle_frame(frame, 0);
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], NodeEffect::SendFrame(_)));
    }

    #[test]
    fn tick_evicts_stale_peers_and_persists_removal() {
        let mut node = state("alice");
        node.peers.touch(id("ghost"), 0);
        let effects = node.tick(crate::types::PEER_EVICTION_AGE_MS + 1);
        assert!(effects
            .iter()
            .any(|e| matches!(e, NodeEffect::RemovePersistedPeer(p) if *p == id("ghost"))));
    }

    #[test]
    fn tick_flushes_peer_table_mutations_from_the_dirty_set() {
        let mut node = state("alice");
        let frame = Frame::new(
            FrameType::Heartbeat,
            id("bob"),
            id("alice"),
            HeartbeatPayload { profile_version: 0 }.to_bytes(),
        );
        node.handle_frame(frame, 0); // upserts bob, marking it dirty

        let effects = node.tick(0);
        let batch = effects.iter().find_map(|e| match e {
            NodeEffect::PersistPeersBatch(peers) => Some(peers),
            _ => None,
        });
        let batch = batch.expect("dirty peer should be flushed on tick");
        assert!(batch.iter().any(|p| p.peer_id == id("bob")));
    }

    #[test]
    fn msg_request_repersists_outbox_as_requested() {
        let mut sender = state("alice");
        sender.send_message(1, id("bob"), MessageKind::Text, b"hi".to_vec(), 0);
        let request = Frame::new_staged(
            FrameType::MsgRequest,
            id("bob"),
            id("alice"),
            1,
            Stage::Requested,
            Vec::new(),
        );
        let effects = sender.handle_frame(request, 0);
        let persisted = effects.iter().find_map(|e| match e {
            NodeEffect::PersistOutbound(msg) => Some(msg),
            _ => None,
        });
        let persisted = persisted.expect("requested stage should be re-persisted");
        assert_eq!(persisted.stage, Stage::Requested);
    }

    #[test]
    fn msg_deliver_emits_persist_delivered_alongside_the_event() {
        let mut receiver = state("bob");
        let deliver = Frame::new_staged(
            FrameType::MsgDeliver,
            id("alice"),
            id("bob"),
            1,
            Stage::Requested,
            DeliverPayload {
                kind: MessageKind::Text,
                body: b"hi".to_vec(),
            }
            .to_bytes(),
        );
        let effects = receiver.handle_frame(deliver, 0);
        assert!(effects.iter().any(|e| matches!(
            e,
            NodeEffect::PersistDelivered { from, message_id } if *from == id("alice") && *message_id == 1
        )));
    }

    #[test]
    fn refresh_discovery_issues_online_checks_for_known_peers() {
        let mut node = state("alice");
        node.peers.touch(id("bob"), 0);
        let effects = node.refresh_discovery(1000);
        assert!(effects.iter().any(|e| matches!(
            e,
            NodeEffect::SendFrame(f) if f.frame_type == FrameType::OnlineCheck && f.to == id("bob")
        )));
    }
}
