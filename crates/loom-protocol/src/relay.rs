//! Relay forwarding (spec.md §4.5, C7).
//!
//! Deliberately simple compared to the teacher's `relay::RelaySelector`:
//! there is no path selection or role election here, just an on/off
//! willingness to forward one hop for a peer that can't reach its
//! destination directly. Grounded on the teacher's `relay::PeerRole`
//! for the enable/disable shape, with the topology/selection logic cut
//! since multi-hop routing is out of scope.
use serde::{Deserialize, Serialize};

use crate::types::PeerId;

/// Whether this node currently offers relay forwarding (spec.md §4.5:
/// operator-controlled, off by default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayMode {
    Disabled,
    Enabled,
}

impl Default for RelayMode {
    fn default() -> Self {
        RelayMode::Disabled
    }
}

/// An inbound `Relay{to, inner}` frame, decoded far enough to forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub to: PeerId,
    pub inner: Vec<u8>,
}

impl RelayEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec_named(self).expect("RelayEnvelope serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, crate::error::MeshError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Outcome of considering an inbound relay request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayDecision {
    /// Forward `inner` on to `to` as a plain frame send.
    Forward { to: PeerId, inner: Vec<u8> },
    /// Relaying is disabled; drop silently (the sender times out and
    /// retries through its own outbox backoff, spec.md §4.5).
    Dropped,
}

/// Pure decision function: given the node's current relay mode, decide
/// what to do with an inbound relay envelope.
#[derive(Debug, Default)]
pub struct RelayService {
    pub mode: RelayMode,
}

impl RelayService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.mode = if enabled {
            RelayMode::Enabled
        } else {
            RelayMode::Disabled
        };
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, RelayMode::Enabled)
    }

    pub fn handle_relay_frame(&self, envelope: RelayEnvelope) -> RelayDecision {
        match self.mode {
            RelayMode::Enabled => RelayDecision::Forward {
                to: envelope.to,
                inner: envelope.inner,
            },
            RelayMode::Disabled => RelayDecision::Dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        PeerId::from(s)
    }

    #[test]
    fn disabled_by_default() {
        let relay = RelayService::new();
        assert!(!relay.is_enabled());
    }

    #[test]
    fn forwards_when_enabled() {
        let mut relay = RelayService::new();
        relay.set_enabled(true);
        let decision = relay.handle_relay_frame(RelayEnvelope {
            to: id("carol"),
            inner: vec![1, 2, 3],
        });
        assert_eq!(
            decision,
            RelayDecision::Forward {
                to: id("carol"),
                inner: vec![1, 2, 3]
            }
        );
    }

    #[test]
    fn drops_when_disabled() {
        let relay = RelayService::new();
        let decision = relay.handle_relay_frame(RelayEnvelope {
            to: id("carol"),
            inner: vec![1, 2, 3],
        });
        assert_eq!(decision, RelayDecision::Dropped);
    }

    #[test]
    fn toggle_round_trips() {
        let mut relay = RelayService::new();
        relay.set_enabled(true);
        assert!(relay.is_enabled());
        relay.set_enabled(false);
        assert!(!relay.is_enabled());
    }

    #[test]
    fn envelope_roundtrip() {
        let env = RelayEnvelope {
            to: id("dave"),
            inner: b"payload".to_vec(),
        };
        let bytes = env.to_bytes();
        let decoded = RelayEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(env, decoded);
    }
}
