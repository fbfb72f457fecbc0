//! Session metrics

use metrics::{Counter, Gauge};

/// Router counters.
#[derive(Clone, Debug)]
pub(crate) struct SessionMetrics {
    /// Inbound frames addressed to a handle with no link
    pub(crate) frames_unknown_link_total: Counter,
    /// Links detached for breaking the protocol
    pub(crate) protocol_violations_total: Counter,
    /// Links currently attached
    pub(crate) links_attached: Gauge,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self {
            frames_unknown_link_total: metrics::counter!("tern.session.frames_unknown_link_total"),
            protocol_violations_total: metrics::counter!("tern.session.protocol_violations_total"),
            links_attached: metrics::gauge!("tern.session.links_attached"),
        }
    }
}
