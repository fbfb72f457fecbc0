//! Decoded link performatives.
//!
//! The transport decodes frames into [`LinkFrame`]s tagged with the handle of
//! the link they belong to, and encodes the [`LinkFrame`]s the engine emits.

use bytes::Bytes;

use crate::{
    DeliveryId, DeliveryTag, ErrorCondition, Handle, Outcome, ReceiverSettleMode, Role,
    SenderSettleMode,
};

/// A performative addressed to one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// The link the frame belongs to.
    pub handle: Handle,
    /// The performative.
    pub body: Performative,
}

impl LinkFrame {
    /// Tag a performative with a link handle.
    pub fn new(handle: Handle, body: impl Into<Performative>) -> Self {
        Self {
            handle,
            body: body.into(),
        }
    }
}

/// Link-level performatives handled by the engine.
#[derive(Debug, Clone, PartialEq, Eq, strum::AsRefStr, derive_more::From)]
#[strum(serialize_all = "lowercase")]
pub enum Performative {
    /// A completed attach carrying the negotiated settle modes.
    Attach(Attach),
    /// Link teardown.
    Detach(Detach),
    /// One message transfer.
    Transfer(Transfer),
    /// Settlement state for a range of deliveries.
    Disposition(Disposition),
    /// Link credit update.
    Flow(Flow),
}

/// Completed attach, as handed over by the link lifecycle collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attach {
    /// Link name.
    pub name: String,
    /// Local handle of the link.
    pub handle: Handle,
    /// Local role.
    pub role: Role,
    /// Negotiated sender settle mode.
    pub snd_settle_mode: SenderSettleMode,
    /// Negotiated receiver settle mode.
    pub rcv_settle_mode: ReceiverSettleMode,
    /// First delivery count of the sending side.
    pub initial_delivery_count: u32,
}

/// Link teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detach {
    /// Whether the link is closed rather than suspended.
    pub closed: bool,
    /// Why the link was detached.
    pub error: Option<ErrorCondition>,
}

/// One message transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Delivery id allocated by the sender.
    pub delivery_id: DeliveryId,
    /// Sender-chosen tag.
    pub delivery_tag: DeliveryTag,
    /// Whether the sender pre-settled the delivery.
    pub settled: bool,
    /// Encoded message, opaque to the engine.
    pub payload: Bytes,
}

/// Settlement state for an inclusive range of deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    /// Role of the endpoint that produced the disposition.
    pub role: Role,
    /// First delivery id of the range.
    pub first: DeliveryId,
    /// Last delivery id of the range; `first` when absent.
    pub last: Option<DeliveryId>,
    /// Whether the deliveries are settled.
    pub settled: bool,
    /// Delivery state to apply.
    pub state: Outcome,
}

impl Disposition {
    /// Disposition for a single delivery.
    pub fn single(role: Role, id: DeliveryId, settled: bool, state: Outcome) -> Self {
        Self {
            role,
            first: id,
            last: None,
            settled,
            state,
        }
    }

    /// Disposition for an inclusive range.
    pub fn range(
        role: Role,
        first: DeliveryId,
        last: DeliveryId,
        settled: bool,
        state: Outcome,
    ) -> Self {
        Self {
            role,
            first,
            last: Some(last),
            settled,
            state,
        }
    }

    /// The effective last id of the range.
    pub fn last_or_first(&self) -> DeliveryId {
        self.last.unwrap_or(self.first)
    }
}

/// Link credit update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flow {
    /// Sender's delivery count as known by the emitting endpoint.
    pub delivery_count: u32,
    /// Credit available to the sender.
    pub link_credit: u32,
    /// Ask the sender to use up its credit now.
    pub drain: bool,
    /// Ask the peer to answer with its own flow state.
    pub echo: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_defaults_last_to_first() {
        let single = Disposition::single(Role::Receiver, DeliveryId::new(4), true, Outcome::Accepted);
        assert_eq!(single.last_or_first(), DeliveryId::new(4));

        let range = Disposition::range(
            Role::Receiver,
            DeliveryId::new(1),
            DeliveryId::new(9),
            true,
            Outcome::Accepted,
        );
        assert_eq!(range.last_or_first(), DeliveryId::new(9));
    }

    #[test]
    fn test_link_frame_tags_handle() {
        let frame = LinkFrame::new(Handle::new(3), Flow::default());
        assert_eq!(frame.handle, Handle::new(3));
        assert_eq!(frame.body.as_ref(), "flow");
    }
}
