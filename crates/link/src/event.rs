//! Per-link notifications.

use tern_proto::{DeliveryId, ErrorCondition, Outcome, Role};

/// Something that happened on one link.
///
/// Each link publishes only its own events: a disposition addressed to a
/// sender link never shows up on a receiver link's subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A disposition from the remote was applied to this link.
    DispositionReceived {
        /// Role of the endpoint that produced the disposition.
        role: Role,
        /// First id of the range.
        first: DeliveryId,
        /// Last id of the range.
        last: DeliveryId,
        /// Whether the range was settled.
        settled: bool,
        /// Delivery state applied.
        state: Outcome,
    },
    /// A flow frame updated the credit window.
    Flow {
        /// Credit available after the update.
        available: u32,
    },
    /// A drain completed; no credit is left until the next grant.
    Drained,
    /// The link was detached.
    Detached {
        /// Why the link was detached.
        error: Option<ErrorCondition>,
    },
}
