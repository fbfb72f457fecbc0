//! Sender and receiver links.
//!
//! A link owns one [`DeliveryTracker`](crate::DeliveryTracker) and one
//! [`CreditController`](crate::CreditController) behind a mutex scoped to the
//! link: application calls and inbound frames for the same link are
//! serialised there, while different links never contend.
//!
//! Links are cheap-to-clone handles. The session router keeps one clone in its
//! table as a [`Link`]; the application keeps the role-specific
//! [`SenderLink`] or [`ReceiverLink`].

mod receiver;
mod sender;
mod stream;

pub use receiver::ReceiverLink;
pub use sender::SenderLink;
pub use stream::{IncomingMessage, MessageStream};

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tern_proto::{
    Attach, Disposition, ErrorCondition, Flow, Handle, Performative, Role, Transfer,
};
use tokio::sync::broadcast;

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::{LinkError, LinkResult};
use crate::event::LinkEvent;
use crate::metrics::LinkMetrics;
use crate::policy::{SettlementMode, SettlementPolicy};
use crate::sink::FrameSink;

/// State shared by the clones of one link.
struct LinkCore<S> {
    handle: Handle,
    name: String,
    policy: SettlementPolicy,
    sink: Arc<dyn FrameSink>,
    events: broadcast::Sender<LinkEvent>,
    metrics: LinkMetrics,
    state: Mutex<S>,
}

impl<S> LinkCore<S> {
    fn new(attach: &Attach, sink: Arc<dyn FrameSink>, state: S) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            handle: attach.handle,
            name: attach.name.clone(),
            policy: SettlementPolicy::new(SettlementMode::from_attach(attach), attach.role),
            sink,
            events,
            metrics: LinkMetrics::default(),
            state: Mutex::new(state),
        }
    }

    fn enqueue(&self, body: impl Into<Performative>) -> LinkResult<()> {
        self.sink.enqueue(self.handle, body.into())
    }

    fn publish(&self, event: LinkEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn violation(&self, reason: impl Into<String>) -> LinkError {
        LinkError::ProtocolViolation {
            handle: self.handle,
            reason: reason.into(),
        }
    }

    /// Reject a disposition produced by an endpoint of our own role.
    fn check_disposition_role(&self, disposition: &Disposition) -> LinkResult<()> {
        let expected = self.policy.role().opposite();
        if disposition.role != expected {
            return Err(self.violation(format!(
                "disposition from a {} applied to a {} link",
                disposition.role,
                self.policy.role()
            )));
        }
        Ok(())
    }
}

/// A link of either role, as held by the session router.
#[derive(Debug, Clone)]
pub enum Link {
    /// Local sender.
    Sender(SenderLink),
    /// Local receiver.
    Receiver(ReceiverLink),
}

impl Link {
    /// The link handle.
    pub fn handle(&self) -> Handle {
        match self {
            Self::Sender(link) => link.handle(),
            Self::Receiver(link) => link.handle(),
        }
    }

    /// The local role.
    pub fn role(&self) -> Role {
        match self {
            Self::Sender(_) => Role::Sender,
            Self::Receiver(_) => Role::Receiver,
        }
    }

    /// The link name.
    pub fn name(&self) -> &str {
        match self {
            Self::Sender(link) => link.name(),
            Self::Receiver(link) => link.name(),
        }
    }

    /// The settlement policy fixed at attach.
    pub fn policy(&self) -> SettlementPolicy {
        match self {
            Self::Sender(link) => link.policy(),
            Self::Receiver(link) => link.policy(),
        }
    }

    /// Subscribe to this link's events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        match self {
            Self::Sender(link) => link.subscribe(),
            Self::Receiver(link) => link.subscribe(),
        }
    }

    /// Apply an inbound transfer. Transfers never flow towards a sender.
    pub fn on_transfer(&self, transfer: Transfer) -> LinkResult<()> {
        match self {
            Self::Sender(link) => Err(link.violation("transfer received on a sender link")),
            Self::Receiver(link) => link.on_transfer(transfer),
        }
    }

    /// Apply an inbound disposition.
    pub fn on_disposition(&self, disposition: &Disposition) -> LinkResult<()> {
        match self {
            Self::Sender(link) => link.on_disposition(disposition),
            Self::Receiver(link) => link.on_disposition(disposition),
        }
    }

    /// Apply an inbound flow.
    pub fn on_flow(&self, flow: &Flow) -> LinkResult<()> {
        match self {
            Self::Sender(link) => link.on_flow(flow),
            Self::Receiver(link) => link.on_flow(flow),
        }
    }

    /// Detach: refuse further operations and resolve pending deliveries as closed.
    pub fn close(&self, error: Option<ErrorCondition>) -> usize {
        match self {
            Self::Sender(link) => link.close(error),
            Self::Receiver(link) => link.close(error),
        }
    }

    /// Drop settled deliveries past their retention window.
    pub fn prune_at(&self, now: Instant) -> usize {
        match self {
            Self::Sender(link) => link.prune_at(now),
            Self::Receiver(link) => link.prune_at(now),
        }
    }
}

impl From<SenderLink> for Link {
    fn from(link: SenderLink) -> Self {
        Self::Sender(link)
    }
}

impl From<ReceiverLink> for Link {
    fn from(link: ReceiverLink) -> Self {
        Self::Receiver(link)
    }
}
