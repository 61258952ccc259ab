//! Shared identifiers, wire enums, and tunables for the mesh protocol.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque, globally unique identifier of a node, assigned once per node
/// lifetime. Cheap to clone (backed by `Arc<str>`) since it flows through
/// every envelope, peer record, and outbox entry.
#[derive(Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Arc<str>);

impl PeerId {
    pub fn new(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for PeerId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl std::hash::Hash for PeerId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for PeerId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl FromStr for PeerId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Arc::from(s)))
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}

/// Current time as milliseconds since an arbitrary epoch (Unix epoch in
/// practice), matching the wire format's timestamp convention (spec.md §6).
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before epoch")
        .as_millis() as u64
}

/// Wire frame type (spec.md §4.1). Determines dispatch: discovery frames
/// go to the discovery engine, `Msg*` frames go to the message engine,
/// `Relay` goes to the relay service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    Heartbeat,
    DiscoveryNotify,
    DeviceListRequest,
    DeviceListResponse,
    OnlineCheck,
    OnlineAck,
    ProfileRequest,
    ProfileResponse,
    MsgNotify,
    MsgRequest,
    MsgDeliver,
    MsgAck,
    Relay,
    /// Anything the decoder doesn't recognize. Non-fatal: the frame is
    /// logged and dropped rather than rejected as malformed (spec.md §4.1).
    #[serde(other)]
    Unknown,
}

/// Three-stage message protocol stage (spec.md §3, §4.4.1).
///
/// Only ever advances forward. `Delivered` and `Failed` are terminal for
/// retry purposes; a user retry re-enters `Notified` from `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Notified = 0,
    Requested = 1,
    Delivered = 2,
    Failed = 3,
}

/// Media/content kind of an outbound or inbound message body (spec.md §4.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    Image,
    Video,
    File,
}

/// Heartbeat cadence: every 10 minutes (spec.md §4.3.1).
pub const HEARTBEAT_INTERVAL_MS: u64 = 10 * 60 * 1000;

/// Online-check round-trip timeout: 5 s (spec.md §4.3.2).
pub const ONLINE_CHECK_TIMEOUT_MS: u64 = 5_000;

/// A peer counts as online iff its last heartbeat is within this window
/// (spec.md §4.2 `isOnline`).
pub const ONLINE_WINDOW_MS: u64 = 10 * 60 * 1000;

/// Peers with no heartbeat for longer than this are evicted from the
/// peer table on sweep (spec.md §3 `PeerRecord` lifecycle).
pub const PEER_EVICTION_AGE_MS: u64 = 3 * 24 * 60 * 60 * 1000;

/// Retry policy for outbound messages while `stage ∈ {Notified, Requested}`
/// (spec.md §4.4.1): exponential backoff, base 1 s, factor 2, cap 30 s,
/// 8 attempts max before the message moves to `Failed`.
pub const RETRY_BASE_MS: u64 = 1_000;
pub const RETRY_FACTOR: u64 = 2;
pub const RETRY_CAP_MS: u64 = 30_000;
pub const RETRY_MAX_ATTEMPTS: u32 = 8;

/// Minimum dedup capacity per source peer (spec.md §3 `InboundDedup`).
pub const DEDUP_CAPACITY: usize = 1024;

/// Time budget for a relay forward attempt before it is silently dropped
/// (spec.md §4.5).
pub const RELAY_FORWARD_TIMEOUT_MS: u64 = 5_000;

/// Default graceful-shutdown drain budget (spec.md §5).
pub const SHUTDOWN_GRACE_MS: u64 = 10_000;

/// Hard cap on how many peers a single recursive discovery expansion will
/// visit, guarding against a frontier that never drains on a large or
/// adversarial mesh (spec.md §4.3.3 bounded expansion).
pub const EXPANSION_MAX_VISITED: usize = 10_000;

/// Number of peers contacted per expansion tick, spreading the fan-out
/// across several runtime ticks rather than blasting every frontier
/// member in one pass (spec.md §4.3.3).
pub const EXPANSION_BATCH_SIZE: usize = 8;
