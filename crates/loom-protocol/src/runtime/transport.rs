//! External channel abstraction (spec.md §6, C8 external interface).
//!
//! The mesh protocol never opens a socket itself — NAT traversal,
//! signaling, and the actual byte pipe between two nodes are explicitly
//! out of scope and supplied by the embedding application. `Transport` is
//! the seam: anything that can push bytes to a peer id and report who's
//! currently reachable can back a [`crate::runtime::NodeState`]. Grounded
//! directly on the teacher's `runtime::transport::Transport` trait and its
//! `mock` submodule.
use async_trait::async_trait;

use crate::error::MeshError;
use crate::types::PeerId;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send already-encoded frame bytes to `to`. Errors are non-fatal to
    /// the node actor: the caller logs and lets the outbox backoff retry.
    async fn send_raw(&self, to: &PeerId, bytes: Vec<u8>) -> Result<(), MeshError>;

    /// Peers the transport currently considers reachable. Used by the
    /// discovery engine to decide who to heartbeat (spec.md §4.3.1: only
    /// peers the transport can currently reach receive a heartbeat this
    /// tick, rather than every peer ever seen).
    fn connected_peers(&self) -> Vec<PeerId>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use std::sync::Mutex;

    use super::*;

    /// Records every send and can be told which peers are reachable and
    /// which sends should fail, for deterministic tests.
    #[derive(Default)]
    pub struct MockTransport {
        sent: Mutex<Vec<(PeerId, Vec<u8>)>>,
        reachable: Mutex<Vec<PeerId>>,
        unreachable: Mutex<Vec<PeerId>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_reachable(&self, peers: Vec<PeerId>) {
            *self.reachable.lock().expect("mock transport mutex poisoned") = peers;
        }

        pub fn fail_sends_to(&self, peer: PeerId) {
            self.unreachable
                .lock()
                .expect("mock transport mutex poisoned")
                .push(peer);
        }

        pub fn sent_frames(&self) -> Vec<(PeerId, Vec<u8>)> {
            self.sent.lock().expect("mock transport mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_raw(&self, to: &PeerId, bytes: Vec<u8>) -> Result<(), MeshError> {
            if self
                .unreachable
                .lock()
                .expect("mock transport mutex poisoned")
                .contains(to)
            {
                return Err(MeshError::TransportSend {
                    peer: to.to_string(),
                    reason: "mock: marked unreachable".into(),
                });
            }
            self.sent
                .lock()
                .expect("mock transport mutex poisoned")
                .push((to.clone(), bytes));
            Ok(())
        }

        fn connected_peers(&self) -> Vec<PeerId> {
            self.reachable.lock().expect("mock transport mutex poisoned").clone()
        }
    }

}
