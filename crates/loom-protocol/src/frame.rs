//! Wire envelope for the mesh protocol (spec.md §4.1, C1 Frame Codec).
//!
//! The codec is pure: encoding/decoding never touches the network, the
//! peer table, or the clock. `payload` is opaque to this module — each
//! frame type's payload is a small struct serialized independently and
//! stashed in `Frame::payload`; only the handler for that frame type
//! knows how to parse it.
use serde::{Deserialize, Serialize};

use crate::error::MeshError;
use crate::types::{now_ms, FrameType, PeerId, Stage};

/// The wire envelope. Serialized as MessagePack — compact, self-describing,
/// and round-trips `u128` message ids and arbitrary-length byte payloads
/// without truncation (spec.md §6 wire format requirement).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub from: PeerId,
    pub to: PeerId,
    pub ts: u64,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none", default)]
    pub message_id: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stage: Option<Stage>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame with no message id / stage (control frames:
    /// heartbeat, discovery, online-check, profile).
    pub fn new(frame_type: FrameType, from: PeerId, to: PeerId, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            from,
            to,
            ts: now_ms(),
            message_id: None,
            stage: None,
            payload,
        }
    }

    /// Build a message-protocol frame carrying a message id and stage.
    pub fn new_staged(
        frame_type: FrameType,
        from: PeerId,
        to: PeerId,
        message_id: u128,
        stage: Stage,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            frame_type,
            from,
            to,
            ts: now_ms(),
            message_id: Some(message_id),
            stage: Some(stage),
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MeshError> {
        rmp_serde::to_vec_named(self).map_err(Into::into)
    }

    /// Decode a frame. Per spec.md §4.1, a malformed frame (missing
    /// required fields, corrupt msgpack) is the caller's responsibility
    /// to log-and-drop; an unrecognized `type` value decodes fine (into
    /// [`FrameType::Unknown`]) since frame type is tagged with a
    /// catch-all variant rather than rejected outright.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MeshError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.frame_type, FrameType::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::from(name)
    }

    #[test]
    fn roundtrip_control_frame() {
        let frame = Frame::new(
            FrameType::Heartbeat,
            peer("alice"),
            peer("bob"),
            b"payload".to_vec(),
        );
        let bytes = frame.to_bytes().unwrap();
        let decoded = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn roundtrip_staged_frame() {
        let frame = Frame::new_staged(
            FrameType::MsgNotify,
            peer("alice"),
            peer("bob"),
            u128::MAX - 1,
            Stage::Notified,
            vec![],
        );
        let bytes = frame.to_bytes().unwrap();
        let decoded = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.message_id, Some(u128::MAX - 1));
        assert_eq!(decoded.stage, Some(Stage::Notified));
    }

    #[test]
    fn roundtrip_all_frame_types() {
        let types = [
            FrameType::Heartbeat,
            FrameType::DiscoveryNotify,
            FrameType::DeviceListRequest,
            FrameType::DeviceListResponse,
            FrameType::OnlineCheck,
            FrameType::OnlineAck,
            FrameType::ProfileRequest,
            FrameType::ProfileResponse,
            FrameType::MsgNotify,
            FrameType::MsgRequest,
            FrameType::MsgDeliver,
            FrameType::MsgAck,
            FrameType::Relay,
        ];
        for ft in types {
            let frame = Frame::new(ft, peer("a"), peer("b"), vec![1, 2, 3]);
            let bytes = frame.to_bytes().unwrap();
            let decoded = Frame::from_bytes(&bytes).unwrap();
            assert_eq!(frame.frame_type, decoded.frame_type);
        }
    }

    #[test]
    fn large_payload_roundtrip() {
        let payload = vec![0xABu8; 1 << 20];
        let frame = Frame::new(FrameType::MsgDeliver, peer("a"), peer("b"), payload.clone());
        let bytes = frame.to_bytes().unwrap();
        let decoded = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn unknown_type_decodes_non_fatally() {
        // Hand-construct a frame whose `type` field is a string msgpack
        // doesn't recognize as one of our variants.
        let mut value = rmp_serde::to_vec_named(&Frame::new(
            FrameType::Heartbeat,
            peer("a"),
            peer("b"),
            vec![],
        ))
        .unwrap();
        // Cheap corruption-free substitution isn't practical on raw bytes;
        // instead verify the #[serde(other)] fallback directly.
        let unknown_type: FrameType = serde_json::from_str("\"SomethingFromTheFuture\"").unwrap();
        assert_eq!(unknown_type, FrameType::Unknown);
        let _ = &mut value; // keep the encoded bytes reachable for clarity
    }

    #[test]
    fn invalid_bytes_rejected() {
        let result = Frame::from_bytes(b"not valid msgpack at all");
        assert!(result.is_err());
    }

    #[test]
    fn encode_decode_is_identity() {
        let frame = Frame::new_staged(
            FrameType::MsgAck,
            peer("carol"),
            peer("dave"),
            42,
            Stage::Delivered,
            b"ack".to_vec(),
        );
        let roundtripped = Frame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(frame, roundtripped);
    }
}
