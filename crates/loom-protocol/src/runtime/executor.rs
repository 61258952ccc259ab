//! The sole I/O touchpoint: turns [`NodeEffect`]s into transport sends,
//! storage writes, and outbound events (spec.md §5).
//!
//! Grounded on the teacher's `runtime::executor::execute_effects`. Errors
//! here are deliberately swallowed past a `tracing::warn!`/`error!` — per
//! spec.md §7, a failed send just lets the outbox retry, and a failed
//! persistence write is logged but does not crash the node actor (the
//! in-memory state remains authoritative until the next successful
//! write).
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::persistence::Storage;
use crate::runtime::effect::NodeEffect;
use crate::runtime::transport::Transport;
use crate::runtime::NodeEvent;

pub async fn execute_effects(
    effects: Vec<NodeEffect>,
    transport: &Arc<dyn Transport>,
    storage: Option<&Storage>,
    events: &mpsc::Sender<NodeEvent>,
) {
    for effect in effects {
        match effect {
            NodeEffect::SendFrame(frame) => match frame.to_bytes() {
                Ok(bytes) => {
                    if let Err(e) = transport.send_raw(&frame.to, bytes).await {
                        warn!(to = %frame.to, frame_type = ?frame.frame_type, error = %e, "send failed");
                    }
                }
                Err(e) => error!(frame_type = ?frame.frame_type, error = %e, "frame encode failed"),
            },
            NodeEffect::PersistProfile(profile) => {
                if let Some(storage) = storage {
                    if let Err(e) = storage.save_profile(&profile).await {
                        error!(error = %e, "failed to persist profile");
                    }
                }
            }
            NodeEffect::PersistPeer(peer) => {
                if let Some(storage) = storage {
                    if let Err(e) = storage.save_peer(peer).await {
                        error!(error = %e, "failed to persist peer");
                    }
                }
            }
            NodeEffect::PersistPeersBatch(peers) => {
                if let Some(storage) = storage {
                    if let Err(e) = storage.save_peers_batch(peers).await {
                        error!(error = %e, "failed to persist peer batch");
                    }
                }
            }
            NodeEffect::PersistOutbound(msg) => {
                if let Some(storage) = storage {
                    if let Err(e) = storage.save_outbound(msg).await {
                        error!(error = %e, "failed to persist outbound message");
                    }
                }
            }
            NodeEffect::DeleteOutbound(message_id) => {
                if let Some(storage) = storage {
                    if let Err(e) = storage.delete_outbound(message_id).await {
                        error!(error = %e, "failed to prune delivered outbound message");
                    }
                }
            }
            NodeEffect::RemovePersistedPeer(peer_id) => {
                if let Some(storage) = storage {
                    if let Err(e) = storage.remove_peer(peer_id).await {
                        error!(error = %e, "failed to remove evicted peer");
                    }
                }
            }
            NodeEffect::PersistDelivered { from, message_id } => {
                if let Some(storage) = storage {
                    if let Err(e) = storage.save_delivered(from, message_id).await {
                        error!(error = %e, "failed to persist delivered message id");
                    }
                }
            }
            NodeEffect::EmitEvent(event) => {
                if events.send(event).await.is_err() {
                    warn!("event receiver dropped, discarding event");
                }
            }
        }
    }
}
