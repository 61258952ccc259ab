//! Effects emitted by [`crate::runtime::state::NodeState`] (spec.md §5).
//!
//! `NodeState`'s `handle_*`/`tick_*` methods are pure: given the current
//! state and an input, they return what should happen next rather than
//! doing it. [`execute_effects`] is the only place any of these actually
//! touch the network, the clock, or disk — grounded on the teacher's
//! `runtime::effect::RuntimeEffect` / `runtime::executor` split.
use crate::frame::Frame;
use crate::message::OutboundMessage;
use crate::peer_table::PeerRecord;
use crate::profile::LocalProfile;
use crate::runtime::NodeEvent;
use crate::types::PeerId;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEffect {
    SendFrame(Frame),
    PersistProfile(LocalProfile),
    PersistPeer(PeerRecord),
    PersistPeersBatch(Vec<PeerRecord>),
    PersistOutbound(OutboundMessage),
    DeleteOutbound(u128),
    RemovePersistedPeer(PeerId),
    PersistDelivered { from: PeerId, message_id: u128 },
    EmitEvent(NodeEvent),
}
