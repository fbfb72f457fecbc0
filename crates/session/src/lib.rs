//! AMQP 1.0 session routing.
//!
//! One session multiplexes many links over a single ordered frame stream. The
//! [`SessionRouter`] owns the handle-to-link table and the outbound stream;
//! the [`SessionService`] feeds it inbound frames one at a time.
//!
//! # Actor Pattern
//!
//! - [`SessionService`] runs in its own tokio task, applies inbound frames in
//!   arrival order and prunes settled deliveries on an interval
//! - [`SessionRouter`] is shared with the application, which attaches links
//!   and then talks to them directly
//! - [`TransportChannels`] are the transport's ends: it pushes decoded frames
//!   into `inbound` and drains `outgoing`
//!
//! Use [`create_session`] to wire the three together.

mod args;
mod constants;
mod error;
mod metrics;
mod router;
mod service;
mod writer;

use std::sync::Arc;

use tern_proto::LinkFrame;
use tokio::sync::mpsc;

pub use args::SessionArgs;
pub use error::{SessionError, SessionResult};
pub use router::{Attached, SessionRouter};
pub use service::SessionService;
pub use writer::SessionWriter;

/// The transport collaborator's ends of a session.
#[derive(Debug)]
pub struct TransportChannels {
    /// Decoded frames from the peer, in arrival order.
    pub inbound: mpsc::UnboundedSender<LinkFrame>,
    /// Frames to encode and send to the peer.
    pub outgoing: mpsc::UnboundedReceiver<LinkFrame>,
}

/// Create a session service, its router and the transport channels.
///
/// The arguments are validated first. Spawn the service with
/// `tokio::spawn(service.into_task())`.
pub fn create_session(
    args: &SessionArgs,
) -> SessionResult<(SessionService, Arc<SessionRouter>, TransportChannels)> {
    args.validate().map_err(SessionError::InvalidConfig)?;

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (router, outgoing) = SessionRouter::channel();
    let router = Arc::new(router);

    let service = SessionService::new(router.clone(), inbound_rx, args.prune_interval())?;
    let transport = TransportChannels {
        inbound: inbound_tx,
        outgoing,
    };

    Ok((service, router, transport))
}
