//! Link error types.

use tern_proto::{DeliveryId, Handle};

/// Errors that can occur during link operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// No credit is available to send. Recoverable once the receiver grants more.
    #[error("link {handle} has no credit available")]
    CreditExhausted {
        /// The link that refused the send.
        handle: Handle,
    },

    /// The application tried to settle a delivery it may not settle.
    #[error("delivery {delivery_id} on link {handle}: {reason}")]
    InvalidState {
        /// The link the delivery belongs to.
        handle: Handle,
        /// The delivery the operation targeted.
        delivery_id: DeliveryId,
        /// Why the operation is not allowed.
        reason: String,
    },

    /// The delivery is not (or no longer) tracked by the link.
    #[error("delivery {delivery_id} is not tracked on link {handle}")]
    UnknownDelivery {
        /// The link that was asked.
        handle: Handle,
        /// The unknown delivery.
        delivery_id: DeliveryId,
    },

    /// The link is detached and refuses all further operations.
    #[error("link {handle} is detached")]
    Detached {
        /// The detached link.
        handle: Handle,
    },

    /// The remote broke the link protocol. The link must be detached.
    #[error("protocol violation on link {handle}: {reason}")]
    ProtocolViolation {
        /// The offending link.
        handle: Handle,
        /// What was violated.
        reason: String,
    },

    /// The session output stream is gone.
    #[error("session transport closed")]
    TransportClosed,
}

/// Result type for link operations.
pub type LinkResult<T> = core::result::Result<T, LinkError>;
