//! Message engine (spec.md §4.4, C6): the notify → request → deliver →
//! ack exchange plus retry and dedup.
//!
//! Grounded on the teacher's `router::Router` for the dedup/ack-cache
//! shape and typed payload structs, and `tracker::MessageTracker` for the
//! monotonic stage machine — generalized here from the teacher's single
//! store-and-forward hop into the three explicit round trips spec.md
//! §4.4.1 calls for.
pub mod dedup;
pub mod outbox;

use serde::{Deserialize, Serialize};

use crate::error::MeshError;
use crate::peer_table::{PeerPatch, PeerTable};
use crate::types::{now_ms, MessageKind, PeerId, Stage};

pub use dedup::InboundDedup;
pub use outbox::{backoff_delay_ms, OutboundMessage, Outbox, OutboxAction};

/// Wire payload for `MsgDeliver` (spec.md §4.4.3): the kind tag plus the
/// raw body. Text bodies are UTF-8 bytes; image/video/file bodies are
/// opaque blobs the caller interprets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverPayload {
    pub kind: MessageKind,
    pub body: Vec<u8>,
}

impl DeliverPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec_named(self).expect("DeliverPayload serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MeshError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// An effect the message engine wants performed.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageAction {
    SendNotify { to: PeerId, message_id: u128 },
    SendRequest { to: PeerId, message_id: u128 },
    SendDeliver { to: PeerId, message_id: u128, payload: Vec<u8> },
    SendAck { to: PeerId, message_id: u128 },
    /// Every retry attempt past the first also logs, per spec.md §7.
    GaveUp { to: PeerId, message_id: u128 },
}

/// A message that has been fully delivered to this node and is ready to
/// surface to the application layer (spec.md §4.4.1 step 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub from: PeerId,
    pub message_id: u128,
    pub kind: MessageKind,
    pub body: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MessageEngine {
    pub outbox: Outbox,
    pub dedup: InboundDedup,
}

impl MessageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a new outbound message and return the action to send its
    /// initial `MsgNotify` (spec.md §4.4.1 step 1).
    pub fn send(
        &mut self,
        message_id: u128,
        to: PeerId,
        kind: MessageKind,
        body: Vec<u8>,
        now: u64,
    ) -> MessageAction {
        self.outbox
            .enqueue(OutboundMessage::new(message_id, to.clone(), kind, body, now));
        MessageAction::SendNotify { to, message_id }
    }

    /// Periodic retry pass (spec.md §4.4.2): resend whatever frame fits
    /// the message's current stage, or give up past the attempt budget.
    pub fn tick(&mut self, now: u64) -> Vec<MessageAction> {
        self.outbox
            .tick(now)
            .into_iter()
            .filter_map(|action| match action {
                OutboxAction::Resend { message_id } => {
                    let msg = self.outbox.get(message_id)?;
                    Some(match msg.stage {
                        Stage::Notified => MessageAction::SendNotify {
                            to: msg.to.clone(),
                            message_id,
                        },
                        Stage::Requested => MessageAction::SendDeliver {
                            to: msg.to.clone(),
                            message_id,
                            payload: DeliverPayload {
                                kind: msg.kind,
                                body: msg.body.clone(),
                            }
                            .to_bytes(),
                        },
                        Stage::Delivered | Stage::Failed => return None,
                    })
                }
                OutboxAction::GaveUp { message_id } => {
                    let to = self.outbox.get(message_id)?.to.clone();
                    Some(MessageAction::GaveUp { to, message_id })
                }
            })
            .collect()
    }

    /// Inbound `MsgNotify`: create the peer contact if this is the first
    /// frame ever seen from them (spec.md §4.4.1 "passive contact
    /// creation"), then request delivery — unless `message_id` is already
    /// in the dedup cache, in which case this is a retried notify for a
    /// message already delivered and gets a bare re-ack instead of
    /// restarting the request/deliver round trip.
    pub fn handle_notify(&self, from: PeerId, message_id: u128, peers: &mut PeerTable) -> MessageAction {
        if !peers.contains(&from) {
            peers.upsert(from.clone(), PeerPatch::with_heartbeat(now_ms()));
        }
        if self.dedup.contains(&from, message_id) {
            return MessageAction::SendAck {
                to: from,
                message_id,
            };
        }
        MessageAction::SendRequest {
            to: from,
            message_id,
        }
    }

    /// Inbound `MsgRequest`: advance the outbox entry to `Requested` and
    /// emit its `MsgDeliver`. Returns `None` if the message is unknown
    /// (e.g. it already reached a terminal stage and was dropped) —
    /// spec.md §7: a request for an unknown message is ignored, not an
    /// error.
    pub fn handle_request(&mut self, message_id: u128) -> Option<MessageAction> {
        self.outbox.advance(message_id, Stage::Requested);
        let msg = self.outbox.get(message_id)?;
        Some(MessageAction::SendDeliver {
            to: msg.to.clone(),
            message_id,
            payload: DeliverPayload {
                kind: msg.kind,
                body: msg.body.clone(),
            }
            .to_bytes(),
        })
    }

    /// Inbound `MsgDeliver`: always ack (at-least-once), but only surface
    /// a [`DeliveredMessage`] the first time this id is seen from `from`
    /// (spec.md §4.4.1 step 4, dedup via [`InboundDedup`]).
    pub fn handle_deliver(
        &mut self,
        from: PeerId,
        message_id: u128,
        kind: MessageKind,
        body: Vec<u8>,
    ) -> (MessageAction, Option<DeliveredMessage>) {
        let is_new = self.dedup.observe(from.clone(), message_id);
        let ack = MessageAction::SendAck {
            to: from.clone(),
            message_id,
        };
        let delivered = is_new.then(|| DeliveredMessage {
            from,
            message_id,
            kind,
            body,
        });
        (ack, delivered)
    }

    /// Inbound `MsgAck`: the sender's terminal confirmation.
    pub fn handle_ack(&mut self, message_id: u128) {
        self.outbox.advance(message_id, Stage::Delivered);
    }

    pub fn retry_from_failed(&mut self, message_id: u128, now: u64) {
        self.outbox.retry_from_failed(message_id, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        PeerId::from(s)
    }

    #[test]
    fn send_enqueues_and_emits_notify() {
        let mut engine = MessageEngine::new();
        let action = engine.send(1, id("bob"), MessageKind::Text, b"hi".to_vec(), 0);
        assert_eq!(
            action,
            MessageAction::SendNotify {
                to: id("bob"),
                message_id: 1
            }
        );
    }

    #[test]
    fn full_notify_request_deliver_ack_cycle() {
        let mut sender = MessageEngine::new();
        let mut receiver = MessageEngine::new();
        let mut receiver_peers = PeerTable::new();

        let notify = sender.send(1, id("bob"), MessageKind::Text, b"hello".to_vec(), 0);
        assert!(matches!(notify, MessageAction::SendNotify { .. }));

        let request = receiver.handle_notify(id("alice"), 1, &mut receiver_peers);
        assert_eq!(
            request,
            MessageAction::SendRequest {
                to: id("alice"),
                message_id: 1
            }
        );
        assert!(receiver_peers.contains(&id("alice")));

        let deliver = sender.handle_request(1).unwrap();
        let payload = match deliver {
            MessageAction::SendDeliver { payload, .. } => payload,
            other => panic!("expected SendDeliver, got {other:?}"),
        };
        assert_eq!(
            sender.outbox.get(1).unwrap().stage,
            Stage::Requested
        );

        let decoded = DeliverPayload::from_bytes(&payload).unwrap();
        let (ack, delivered) =
            receiver.handle_deliver(id("alice"), 1, decoded.kind, decoded.body.clone());
        assert_eq!(
            ack,
            MessageAction::SendAck {
                to: id("alice"),
                message_id: 1
            }
        );
        let delivered = delivered.expect("first delivery should surface");
        assert_eq!(delivered.body, b"hello");

        sender.handle_ack(1);
        assert_eq!(sender.outbox.get(1).unwrap().stage, Stage::Delivered);
    }

    #[test]
    fn duplicate_deliver_still_acks_but_does_not_resurface() {
        let mut receiver = MessageEngine::new();
        let (_, first) = receiver.handle_deliver(id("alice"), 1, MessageKind::Text, b"x".to_vec());
        assert!(first.is_some());
        let (ack, second) =
            receiver.handle_deliver(id("alice"), 1, MessageKind::Text, b"x".to_vec());
        assert!(second.is_none());
        assert_eq!(
            ack,
            MessageAction::SendAck {
                to: id("alice"),
                message_id: 1
            }
        );
    }

    #[test]
    fn notify_for_already_delivered_message_reacks_without_rerequesting() {
        let mut engine = MessageEngine::new();
        let mut peers = PeerTable::new();
        engine.handle_deliver(id("alice"), 1, MessageKind::Text, b"hi".to_vec());

        let action = engine.handle_notify(id("alice"), 1, &mut peers);
        assert_eq!(
            action,
            MessageAction::SendAck {
                to: id("alice"),
                message_id: 1
            }
        );
    }

    #[test]
    fn request_for_unknown_message_is_ignored() {
        let mut engine = MessageEngine::new();
        assert!(engine.handle_request(999).is_none());
    }

    #[test]
    fn tick_resends_notify_while_in_notified_stage() {
        let mut engine = MessageEngine::new();
        engine.send(1, id("bob"), MessageKind::Text, b"hi".to_vec(), 0);
        let actions = engine.tick(0);
        assert_eq!(
            actions,
            vec![MessageAction::SendNotify {
                to: id("bob"),
                message_id: 1
            }]
        );
    }

    #[test]
    fn tick_resends_deliver_while_in_requested_stage() {
        let mut engine = MessageEngine::new();
        engine.send(1, id("bob"), MessageKind::Text, b"hi".to_vec(), 0);
        engine.handle_request(1);
        let actions = engine.tick(0);
        match &actions[..] {
            [MessageAction::SendDeliver { to, message_id, .. }] => {
                assert_eq!(to, &id("bob"));
                assert_eq!(*message_id, 1);
            }
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn delivered_message_never_resends() {
        let mut engine = MessageEngine::new();
        engine.send(1, id("bob"), MessageKind::Text, b"hi".to_vec(), 0);
        engine.handle_ack(1);
        let actions = engine.tick(1_000_000);
        assert!(actions.is_empty());
    }
}
