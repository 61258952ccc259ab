//! Outbound message tracking and retry backoff (spec.md §4.4.1, §4.4.2).
//!
//! Grounded on the teacher's `tracker::MessageTracker`: a flat map keyed
//! by message id, a stage that only ever advances, and an age-based sweep.
//! Retry scheduling is new (the teacher has no backoff of its own — its
//! delivery guarantee comes from the underlying QUIC session) and is
//! hand-rolled here as plain exponential-backoff arithmetic, matching the
//! teacher's general style of pure, dependency-free state helpers.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{
    MessageKind, PeerId, Stage, RETRY_BASE_MS, RETRY_CAP_MS, RETRY_FACTOR, RETRY_MAX_ATTEMPTS,
};

/// One message this node is trying to get delivered to `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: u128,
    pub to: PeerId,
    pub kind: MessageKind,
    pub body: Vec<u8>,
    pub stage: Stage,
    pub attempts: u32,
    pub next_attempt_at: u64,
    pub created_at: u64,
}

impl OutboundMessage {
    pub fn new(message_id: u128, to: PeerId, kind: MessageKind, body: Vec<u8>, now: u64) -> Self {
        Self {
            message_id,
            to,
            kind,
            body,
            stage: Stage::Notified,
            attempts: 0,
            next_attempt_at: now,
            created_at: now,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self.stage, Stage::Notified | Stage::Requested)
    }

    fn due(&self, now: u64) -> bool {
        self.is_retryable() && now >= self.next_attempt_at
    }
}

/// Backoff delay for the Nth retry (0-indexed): `base * factor^n`, capped.
pub fn backoff_delay_ms(attempt: u32) -> u64 {
    let scaled = RETRY_BASE_MS.saturating_mul(RETRY_FACTOR.saturating_pow(attempt));
    scaled.min(RETRY_CAP_MS)
}

/// What the outbox wants done this tick for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboxAction {
    /// (Re-)send the frame appropriate to the message's current stage:
    /// `Notified` emits `MsgNotify`, `Requested` emits `MsgDeliver`.
    Resend { message_id: u128 },
    /// Retry budget exhausted; the message moved to `Failed`.
    GaveUp { message_id: u128 },
}

/// The set of messages this node is currently trying to deliver.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: HashMap<u128, OutboundMessage>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, msg: OutboundMessage) {
        self.messages.insert(msg.message_id, msg);
    }

    pub fn get(&self, message_id: u128) -> Option<&OutboundMessage> {
        self.messages.get(&message_id)
    }

    /// Advance a message's stage. Per spec.md §4.4.1, stage only ever
    /// moves forward; a call that would move it backward is a no-op.
    pub fn advance(&mut self, message_id: u128, stage: Stage) {
        if let Some(msg) = self.messages.get_mut(&message_id) {
            if stage > msg.stage {
                msg.stage = stage;
            }
        }
    }

    pub fn is_terminal(&self, message_id: u128) -> bool {
        self.messages
            .get(&message_id)
            .map(|m| matches!(m.stage, Stage::Delivered | Stage::Failed))
            .unwrap_or(true)
    }

    /// Re-enter the retry cycle from `Failed` (a user-initiated resend,
    /// spec.md §4.4.1 terminal-state exception).
    pub fn retry_from_failed(&mut self, message_id: u128, now: u64) {
        if let Some(msg) = self.messages.get_mut(&message_id) {
            if msg.stage == Stage::Failed {
                msg.stage = Stage::Notified;
                msg.attempts = 0;
                msg.next_attempt_at = now;
            }
        }
    }

    /// Due messages get resent and rescheduled; messages that have spent
    /// their attempt budget move to `Failed`. One pass per runtime tick.
    pub fn tick(&mut self, now: u64) -> Vec<OutboxAction> {
        let mut actions = Vec::new();
        for msg in self.messages.values_mut() {
            if !msg.due(now) {
                continue;
            }
            if msg.attempts >= RETRY_MAX_ATTEMPTS {
                msg.stage = Stage::Failed;
                actions.push(OutboxAction::GaveUp {
                    message_id: msg.message_id,
                });
                continue;
            }
            actions.push(OutboxAction::Resend {
                message_id: msg.message_id,
            });
            msg.next_attempt_at = now + backoff_delay_ms(msg.attempts);
            msg.attempts += 1;
        }
        actions
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        PeerId::from(s)
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay_ms(0), 1_000);
        assert_eq!(backoff_delay_ms(1), 2_000);
        assert_eq!(backoff_delay_ms(2), 4_000);
        assert_eq!(backoff_delay_ms(10), RETRY_CAP_MS);
    }

    #[test]
    fn new_message_is_immediately_due() {
        let mut outbox = Outbox::new();
        outbox.enqueue(OutboundMessage::new(
            1,
            id("bob"),
            MessageKind::Text,
            b"hi".to_vec(),
            0,
        ));
        let actions = outbox.tick(0);
        assert_eq!(actions, vec![OutboxAction::Resend { message_id: 1 }]);
    }

    #[test]
    fn not_due_until_backoff_elapses() {
        let mut outbox = Outbox::new();
        outbox.enqueue(OutboundMessage::new(
            1,
            id("bob"),
            MessageKind::Text,
            b"hi".to_vec(),
            0,
        ));
        outbox.tick(0); // first send, schedules next at t=1000
        let actions = outbox.tick(999);
        assert!(actions.is_empty());
        let actions = outbox.tick(1000);
        assert_eq!(actions, vec![OutboxAction::Resend { message_id: 1 }]);
    }

    #[test]
    fn advance_never_moves_backward() {
        let mut outbox = Outbox::new();
        outbox.enqueue(OutboundMessage::new(
            1,
            id("bob"),
            MessageKind::Text,
            b"hi".to_vec(),
            0,
        ));
        outbox.advance(1, Stage::Delivered);
        outbox.advance(1, Stage::Requested); // should be ignored
        assert_eq!(outbox.get(1).unwrap().stage, Stage::Delivered);
    }

    #[test]
    fn delivered_message_stops_retrying() {
        let mut outbox = Outbox::new();
        outbox.enqueue(OutboundMessage::new(
            1,
            id("bob"),
            MessageKind::Text,
            b"hi".to_vec(),
            0,
        ));
        outbox.advance(1, Stage::Delivered);
        let actions = outbox.tick(999_999);
        assert!(actions.is_empty());
        assert!(outbox.is_terminal(1));
    }

    #[test]
    fn exhausting_attempts_moves_to_failed() {
        let mut outbox = Outbox::new();
        outbox.enqueue(OutboundMessage::new(
            1,
            id("bob"),
            MessageKind::Text,
            b"hi".to_vec(),
            0,
        ));
        let mut now = 0u64;
        for _ in 0..RETRY_MAX_ATTEMPTS {
            let actions = outbox.tick(now);
            assert_eq!(actions, vec![OutboxAction::Resend { message_id: 1 }]);
            now = outbox.get(1).unwrap().next_attempt_at;
        }
        let actions = outbox.tick(now);
        assert_eq!(actions, vec![OutboxAction::GaveUp { message_id: 1 }]);
        assert_eq!(outbox.get(1).unwrap().stage, Stage::Failed);
    }

    #[test]
    fn retry_from_failed_resets_attempts() {
        let mut outbox = Outbox::new();
        outbox.enqueue(OutboundMessage::new(
            1,
            id("bob"),
            MessageKind::Text,
            b"hi".to_vec(),
            0,
        ));
        outbox.advance(1, Stage::Failed);
        outbox.retry_from_failed(1, 5000);
        let msg = outbox.get(1).unwrap();
        assert_eq!(msg.stage, Stage::Notified);
        assert_eq!(msg.attempts, 0);
        assert_eq!(msg.next_attempt_at, 5000);
    }
}
