//! Handle-keyed routing between the session stream and its links.
//!
//! The router owns the link table and the session output stream. Inbound
//! frames are looked up by handle and applied to exactly one link; outbound
//! frames from every link funnel through one [`SessionWriter`].
//!
//! The table lock is held only for lookups, inserts and removals. Frame
//! processing runs under the target link's own lock, so work on one link
//! never waits on another. When both are needed, the table lock is taken
//! before the detaching set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tern_link::{
    FrameSink, Link, LinkConfig, LinkError, MessageStream, ReceiverLink, SenderLink,
};
use tern_proto::{Attach, Detach, ErrorCondition, Handle, LinkFrame, Performative, Role};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::{SessionError, SessionResult};
use crate::metrics::SessionMetrics;
use crate::writer::SessionWriter;

/// A link created by [`SessionRouter::attach`].
#[derive(Debug)]
pub enum Attached {
    /// A sender link.
    Sender(SenderLink),
    /// A receiver link and its message stream.
    Receiver(ReceiverLink, MessageStream),
}

/// Routes frames between one session and its attached links.
#[derive(Debug)]
pub struct SessionRouter {
    links: RwLock<HashMap<Handle, Link>>,
    /// Handles we detached whose detach has not been echoed yet.
    detaching: Mutex<HashSet<Handle>>,
    writer: Arc<SessionWriter>,
    metrics: SessionMetrics,
}

impl SessionRouter {
    /// Create a router writing outgoing frames to `outgoing`.
    pub fn new(outgoing: mpsc::UnboundedSender<LinkFrame>) -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            detaching: Mutex::new(HashSet::new()),
            writer: Arc::new(SessionWriter::new(outgoing)),
            metrics: SessionMetrics::default(),
        }
    }

    /// Create a router and the receiving end of its output stream.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LinkFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Create the link for a completed attach, in the role the attach names.
    pub fn attach(&self, attach: &Attach, config: impl LinkConfig) -> SessionResult<Attached> {
        match attach.role {
            Role::Sender => self.attach_sender(attach, config).map(Attached::Sender),
            Role::Receiver => self
                .attach_receiver(attach, config)
                .map(|(link, messages)| Attached::Receiver(link, messages)),
        }
    }

    /// Create a sender link. It can send once the remote grants credit.
    pub fn attach_sender(
        &self,
        attach: &Attach,
        config: impl LinkConfig,
    ) -> SessionResult<SenderLink> {
        let attach = with_role(attach, Role::Sender);
        let link = SenderLink::new(&attach, config, self.sink());
        self.insert(link.clone().into())?;
        Ok(link)
    }

    /// Create a receiver link and grant its initial credit.
    pub fn attach_receiver(
        &self,
        attach: &Attach,
        config: impl LinkConfig,
    ) -> SessionResult<(ReceiverLink, MessageStream)> {
        let attach = with_role(attach, Role::Receiver);
        let initial_credit = config.initial_credit();
        let (link, messages) = ReceiverLink::new(&attach, config, self.sink());
        self.insert(link.clone().into())?;

        if initial_credit > 0 {
            if let Err(err) = link.add_credits(initial_credit) {
                self.remove(attach.handle);
                link.close(None);
                return Err(err.into());
            }
        }
        Ok((link, messages))
    }

    fn sink(&self) -> Arc<dyn FrameSink> {
        self.writer.clone()
    }

    fn insert(&self, link: Link) -> SessionResult<()> {
        let handle = link.handle();
        let mut links = self.links.write();
        if links.contains_key(&handle) || self.detaching.lock().contains(&handle) {
            return Err(SessionError::HandleInUse(handle));
        }
        info!(%handle, name = link.name(), role = %link.role(), mode = %link.policy().mode(), "Link attached");
        links.insert(handle, link);
        self.metrics.links_attached.set(links.len() as f64);
        Ok(())
    }

    /// The link attached on `handle`.
    pub fn link(&self, handle: Handle) -> Option<Link> {
        self.links.read().get(&handle).cloned()
    }

    /// Handles of all attached links.
    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<_> = self.links.read().keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Number of attached links.
    pub fn len(&self) -> usize {
        self.links.read().len()
    }

    /// Whether no link is attached.
    pub fn is_empty(&self) -> bool {
        self.links.read().is_empty()
    }

    /// Apply one inbound frame to the link it addresses.
    ///
    /// A frame for an unknown handle fails with [`SessionError::UnknownLink`]
    /// and touches nothing. A protocol violation detaches the offending link
    /// and is reported as [`SessionError::ProtocolViolation`].
    pub fn dispatch_incoming(&self, frame: LinkFrame) -> SessionResult<()> {
        let LinkFrame { handle, body } = frame;
        trace!(%handle, frame = body.as_ref(), "Inbound frame");

        if let Performative::Detach(detach) = body {
            return self.on_remote_detach(handle, detach);
        }

        let Some(link) = self.link(handle) else {
            warn!(%handle, frame = body.as_ref(), "Frame for unknown link");
            self.metrics.frames_unknown_link_total.increment(1);
            return Err(SessionError::UnknownLink(handle));
        };

        let result = match body {
            Performative::Transfer(transfer) => link.on_transfer(transfer),
            Performative::Disposition(disposition) => link.on_disposition(&disposition),
            Performative::Flow(flow) => link.on_flow(&flow),
            Performative::Attach(_) => {
                debug!(%handle, "Ignoring attach for an attached link");
                Ok(())
            }
            Performative::Detach(_) => Ok(()),
        };

        match result {
            Ok(()) => Ok(()),
            Err(LinkError::ProtocolViolation { handle, reason }) => {
                warn!(%handle, %reason, "Protocol violation, detaching link");
                self.metrics.protocol_violations_total.increment(1);
                let error = ErrorCondition::not_allowed(reason.clone());
                if let Err(err) = self.detach(handle, Some(error)) {
                    debug!(%handle, %err, "Failed to detach violating link");
                }
                Err(SessionError::ProtocolViolation { handle, reason })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn on_remote_detach(&self, handle: Handle, detach: Detach) -> SessionResult<()> {
        if self.detaching.lock().remove(&handle) {
            debug!(%handle, "Detach confirmed");
            return Ok(());
        }

        let Some(link) = self.remove(handle) else {
            warn!(%handle, "Detach for unknown link");
            self.metrics.frames_unknown_link_total.increment(1);
            return Err(SessionError::UnknownLink(handle));
        };

        let pending = link.close(detach.error.clone());
        info!(%handle, pending, error = ?detach.error, "Link detached by remote");
        self.writer
            .enqueue(
                handle,
                Detach {
                    closed: detach.closed,
                    error: None,
                }
                .into(),
            )
            .map_err(|_| SessionError::TransportClosed)
    }

    /// Queue a frame for `handle` on the session output stream.
    pub fn enqueue_outgoing(&self, handle: Handle, body: Performative) -> SessionResult<()> {
        if !self.links.read().contains_key(&handle) {
            return Err(SessionError::UnknownLink(handle));
        }
        self.writer
            .enqueue(handle, body)
            .map_err(|_| SessionError::TransportClosed)
    }

    /// Detach a link: remove it, resolve its pending deliveries as closed and
    /// send a detach frame.
    ///
    /// Returns how many deliveries were still unsettled.
    pub fn detach(&self, handle: Handle, error: Option<ErrorCondition>) -> SessionResult<usize> {
        let link = {
            let mut links = self.links.write();
            let link = links.remove(&handle).ok_or(SessionError::UnknownLink(handle))?;
            self.detaching.lock().insert(handle);
            self.metrics.links_attached.set(links.len() as f64);
            link
        };

        let pending = link.close(error.clone());
        info!(%handle, pending, ?error, "Link detached");
        self.writer
            .enqueue(
                handle,
                Detach {
                    closed: true,
                    error,
                }
                .into(),
            )
            .map_err(|_| SessionError::TransportClosed)?;
        Ok(pending)
    }

    /// Close every link without sending frames, e.g. when the transport is gone.
    ///
    /// Returns how many deliveries were still unsettled across all links.
    pub fn detach_all(&self, error: Option<ErrorCondition>) -> usize {
        let links: Vec<_> = {
            let mut links = self.links.write();
            self.detaching.lock().clear();
            self.metrics.links_attached.set(0.0);
            links.drain().map(|(_, link)| link).collect()
        };

        let pending: usize = links.iter().map(|link| link.close(error.clone())).sum();
        if !links.is_empty() {
            info!(links = links.len(), pending, "Detached all links");
        }
        pending
    }

    /// Drop settled deliveries past their retention window on every link.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    /// [`prune`](Self::prune) against an explicit clock reading.
    pub fn prune_at(&self, now: Instant) -> usize {
        let links: Vec<_> = self.links.read().values().cloned().collect();
        let pruned: usize = links.iter().map(|link| link.prune_at(now)).sum();
        if pruned > 0 {
            debug!(pruned, "Pruned settled deliveries");
        }
        pruned
    }

    fn remove(&self, handle: Handle) -> Option<Link> {
        let mut links = self.links.write();
        let link = links.remove(&handle);
        self.metrics.links_attached.set(links.len() as f64);
        link
    }
}

/// The attach as seen from the local `role`.
fn with_role(attach: &Attach, role: Role) -> Attach {
    Attach {
        role,
        ..attach.clone()
    }
}
