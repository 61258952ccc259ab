//! Node-level counters (spec.md §4.9, C11).
//!
//! Grounded on `loom-metrics::Counter` — no registry or export format,
//! just atomics bumped alongside the handler logic that already owns each
//! event. Whoever embeds a node decides how to surface them.
use loom_metrics::Counter;

#[derive(Debug, Default)]
pub struct NodeMetrics {
    pub heartbeats_sent: Counter,
    pub heartbeats_received: Counter,
    pub peers_discovered: Counter,
    pub online_checks_started: Counter,
    pub online_checks_timed_out: Counter,
    pub messages_sent: Counter,
    pub messages_delivered: Counter,
    pub messages_failed: Counter,
    pub relay_forwarded: Counter,
    pub relay_dropped: Counter,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}
