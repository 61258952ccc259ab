//! The node actor's event loop (spec.md §5): one `tokio::select!` over
//! the tick timer, the command channel, and inbound frames.
//!
//! Grounded directly on the teacher's `runtime::loop::runtime_loop` — same
//! three-armed select, same "drain remaining effects, then exit" shutdown
//! shape.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::frame::Frame;
use crate::persistence::Storage;
use crate::runtime::executor::execute_effects;
use crate::runtime::state::NodeState;
use crate::runtime::transport::Transport;
use crate::runtime::{NodeCommand, NodeEvent};
use crate::types::now_ms;

pub async fn run_loop(
    mut node: NodeState,
    transport: Arc<dyn Transport>,
    storage: Option<Storage>,
    mut cmd_rx: mpsc::Receiver<NodeCommand>,
    mut inbound_rx: mpsc::Receiver<(crate::types::PeerId, Vec<u8>)>,
    event_tx: mpsc::Sender<NodeEvent>,
    tick_interval: Duration,
) {
    info!(local_id = %node.local_id, "node actor starting");
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut shutdown_ack: Option<oneshot::Sender<()>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let effects = node.tick(now_ms());
                execute_effects(effects, &transport, storage.as_ref(), &event_tx).await;
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(NodeCommand::Shutdown { ack }) => {
                        shutdown_ack = Some(ack);
                        break;
                    }
                    Some(command) => {
                        let effects = dispatch_command(&mut node, command, now_ms());
                        execute_effects(effects, &transport, storage.as_ref(), &event_tx).await;
                    }
                    None => {
                        debug!("command channel closed, shutting down");
                        break;
                    }
                }
            }
            inbound = inbound_rx.recv() => {
                match inbound {
                    Some((from, bytes)) => {
                        match Frame::from_bytes(&bytes) {
                            Ok(frame) => {
                                let effects = node.handle_frame(frame, now_ms());
                                execute_effects(effects, &transport, storage.as_ref(), &event_tx).await;
                            }
                            Err(e) => warn!(%from, error = %e, "dropping undecodable inbound frame"),
                        }
                    }
                    None => {
                        debug!("inbound channel closed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    info!(local_id = %node.local_id, "node actor stopping");
    if let Some(ack) = shutdown_ack {
        let _ = ack.send(());
    }
}

/// Translate one [`NodeCommand`] into the `NodeState` call it maps to.
fn dispatch_command(
    node: &mut NodeState,
    command: NodeCommand,
    now: u64,
) -> Vec<crate::runtime::NodeEffect> {
    match command {
        NodeCommand::SendMessage {
            message_id,
            to,
            kind,
            body,
        } => node.send_message(message_id, to, kind, body, now),
        NodeCommand::SetProfile { name, avatar } => node.set_profile(name, avatar),
        NodeCommand::SetRelayEnabled(enabled) => node.set_relay_enabled(enabled),
        NodeCommand::CheckOnline { peer, nonce } => node.request_online_check(peer, nonce, now),
        NodeCommand::Refresh => node.refresh_discovery(now),
        NodeCommand::Shutdown { .. } => unreachable!("handled by caller before dispatch"),
    }
}
