//! Serverless peer-to-peer device discovery and messaging fabric.
//!
//! A mesh of nodes gossips liveness and profile metadata to each other
//! over an externally-supplied [`runtime::Transport`] (NAT traversal and
//! signaling are out of scope — see the crate-level design notes), and
//! exchanges messages through an explicit notify → request → deliver
//! round trip that tolerates redelivery and out-of-order acks.
//!
//! [`runtime::spawn`] is the entry point: it wires a [`runtime::NodeState`]
//! to a transport and an optional [`persistence::Storage`] and returns a
//! [`runtime::NodeHandle`] plus an event stream.

pub mod discovery;
pub mod error;
pub mod frame;
pub mod message;
pub mod metrics;
pub mod peer_table;
pub mod persistence;
pub mod profile;
pub mod relay;
pub mod runtime;
pub mod types;

pub use error::MeshError;
pub use frame::Frame;
pub use metrics::NodeMetrics;
pub use peer_table::{PeerRecord, PeerTable};
pub use profile::LocalProfile;
pub use runtime::{spawn, NodeCommand, NodeConfig, NodeEvent, NodeHandle, NodeState, Transport};
pub use types::{FrameType, MessageKind, PeerId, Stage};
