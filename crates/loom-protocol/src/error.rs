//! Mesh protocol errors.
//!
//! Wraps storage/transport failures and adds protocol-specific variants.
//! Per spec.md §7, most of these are handled locally by the protocol
//! logic (dropped frame, ignored stale profile, re-ack on dedup hit) —
//! only `Persistence` and invalid user input propagate to the caller.

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("frame decode failed: {0}")]
    FrameDecode(String),

    #[error("frame encode failed: {0}")]
    FrameEncode(String),

    #[error("transport open failed for {peer}: {reason}")]
    TransportOpen { peer: String, reason: String },

    #[error("transport send failed for {peer}: {reason}")]
    TransportSend { peer: String, reason: String },

    #[error("peer unreachable: {peer}")]
    PeerUnreachable { peer: String },

    #[error("persistence write failed: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("invalid profile mutation: {reason}")]
    InvalidProfile { reason: String },

    #[error("runtime has shut down")]
    RuntimeShutDown,
}

impl From<rmp_serde::encode::Error> for MeshError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        MeshError::FrameEncode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MeshError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        MeshError::FrameDecode(e.to_string())
    }
}
