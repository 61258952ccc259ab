//! Node actor (spec.md §4.8/§5, C8/C10): wires [`state::NodeState`] to a
//! [`transport::Transport`], an optional [`crate::persistence::Storage`],
//! and the outside world through a handle/event-channel pair.
//!
//! Grounded on the teacher's `runtime` module layout (`mod.rs` for the
//! public handle/config/event types, `loop.rs` for the `tokio::select!`
//! dispatcher, `state.rs`/`effect.rs`/`executor.rs`/`transport.rs` for the
//! rest).
pub mod effect;
pub mod executor;
pub mod r#loop;
pub mod state;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::MeshError;
use crate::message::DeliveredMessage;
use crate::persistence::Storage;
use crate::profile::LocalProfile;
use crate::types::{MessageKind, PeerId};

pub use effect::NodeEffect;
pub use state::NodeState;
pub use transport::Transport;

/// Tunables for one node actor (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub local_id: PeerId,
    pub local_name: String,
    pub tick_interval: Duration,
    pub command_buffer: usize,
    pub inbound_buffer: usize,
    pub event_buffer: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            local_id: PeerId::from(Uuid::new_v4().to_string()),
            local_name: String::new(),
            tick_interval: Duration::from_secs(1),
            command_buffer: 256,
            inbound_buffer: 256,
            event_buffer: 256,
        }
    }
}

/// Requests a running node actor accepts from the application.
#[derive(Debug)]
pub enum NodeCommand {
    SendMessage {
        message_id: u128,
        to: PeerId,
        kind: MessageKind,
        body: Vec<u8>,
    },
    SetProfile {
        name: Option<String>,
        avatar: Option<Option<Vec<u8>>>,
    },
    SetRelayEnabled(bool),
    CheckOnline {
        peer: PeerId,
        nonce: u64,
    },
    Refresh,
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Notifications a running node actor emits to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    MessageDelivered(DeliveredMessage),
    MessageFailed { to: PeerId, message_id: u128 },
    PeerOnline { peer: PeerId, rtt_ms: u64 },
    OnlineCheckTimedOut { peer: PeerId },
    ProfileUpdated { version: u64 },
    RelayModeChanged { enabled: bool },
}

/// Cheap-clone handle to a running node actor. Dropping every clone (and
/// the inbound-frame sender) lets the actor's event loop observe channel
/// closure and exit on its own; [`NodeHandle::shutdown`] is the graceful
/// path (spec.md §5 shutdown drain).
#[derive(Clone)]
pub struct NodeHandle {
    cmd_tx: mpsc::Sender<NodeCommand>,
    inbound_tx: mpsc::Sender<(PeerId, Vec<u8>)>,
}

impl NodeHandle {
    /// Enqueue an outbound message; returns its freshly generated id so
    /// the caller can correlate a later [`NodeEvent::MessageDelivered`] /
    /// [`NodeEvent::MessageFailed`].
    pub async fn send_message(&self, to: PeerId, kind: MessageKind, body: Vec<u8>) -> Result<u128, MeshError> {
        let message_id = Uuid::new_v4().as_u128();
        self.cmd_tx
            .send(NodeCommand::SendMessage {
                message_id,
                to,
                kind,
                body,
            })
            .await
            .map_err(|_| MeshError::RuntimeShutDown)?;
        Ok(message_id)
    }

    pub async fn set_profile(
        &self,
        name: Option<String>,
        avatar: Option<Option<Vec<u8>>>,
    ) -> Result<(), MeshError> {
        self.cmd_tx
            .send(NodeCommand::SetProfile { name, avatar })
            .await
            .map_err(|_| MeshError::RuntimeShutDown)
    }

    pub async fn set_relay_enabled(&self, enabled: bool) -> Result<(), MeshError> {
        self.cmd_tx
            .send(NodeCommand::SetRelayEnabled(enabled))
            .await
            .map_err(|_| MeshError::RuntimeShutDown)
    }

    pub async fn check_online(&self, peer: PeerId) -> Result<(), MeshError> {
        let nonce = Uuid::new_v4().as_u128() as u64;
        self.cmd_tx
            .send(NodeCommand::CheckOnline { peer, nonce })
            .await
            .map_err(|_| MeshError::RuntimeShutDown)
    }

    pub async fn refresh(&self) -> Result<(), MeshError> {
        self.cmd_tx
            .send(NodeCommand::Refresh)
            .await
            .map_err(|_| MeshError::RuntimeShutDown)
    }

    /// Feed a frame received from the transport into the node actor.
    pub async fn deliver_inbound(&self, from: PeerId, bytes: Vec<u8>) -> Result<(), MeshError> {
        self.inbound_tx
            .send((from, bytes))
            .await
            .map_err(|_| MeshError::RuntimeShutDown)
    }

    pub async fn shutdown(&self) -> Result<(), MeshError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(NodeCommand::Shutdown { ack: ack_tx })
            .await
            .map_err(|_| MeshError::RuntimeShutDown)?;
        ack_rx.await.map_err(|_| MeshError::RuntimeShutDown)
    }
}

/// Spawn a node actor, restoring from `storage` if given. Returns the
/// handle plus the event receiver (taken exactly once).
pub async fn spawn(
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    storage: Option<Storage>,
) -> Result<(NodeHandle, mpsc::Receiver<NodeEvent>), MeshError> {
    let mut node = NodeState::new(config.local_id.clone(), LocalProfile::new(config.local_name.clone()));

    if let Some(storage) = &storage {
        if let Some(profile) = storage.load_profile().await? {
            node.profile = profile;
        }
        let peers = storage.load_peers().await?;
        node.restore_peers(peers);
        for msg in storage.load_outbox().await? {
            node.messages.outbox.enqueue(msg);
        }
        for (peer, message_id) in storage.load_delivered().await? {
            node.messages.dedup.restore(peer, message_id);
        }
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer);
    let (event_tx, event_rx) = mpsc::channel(config.event_buffer);

    let handle = NodeHandle {
        cmd_tx,
        inbound_tx,
    };

    tokio::spawn(r#loop::run_loop(
        node,
        transport,
        storage,
        cmd_rx,
        inbound_rx,
        event_tx,
        config.tick_interval,
    ));

    Ok((handle, event_rx))
}
