//! Session service actor (runs in its own tokio task).

use std::sync::Arc;
use std::time::Duration;

use tern_proto::{ErrorCondition, LinkFrame};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::router::SessionRouter;

/// Applies inbound frames one at a time, in arrival order, and periodically
/// prunes settled deliveries.
#[derive(Debug)]
pub struct SessionService {
    /// Router shared with the application.
    router: Arc<SessionRouter>,
    /// Decoded frames from the transport.
    inbound_rx: mpsc::UnboundedReceiver<LinkFrame>,
    /// Time between prune sweeps.
    prune_interval: Duration,
}

impl SessionService {
    /// Create a new session service.
    ///
    /// Fails with [`SessionError::InvalidConfig`] if `prune_interval` is zero.
    pub fn new(
        router: Arc<SessionRouter>,
        inbound_rx: mpsc::UnboundedReceiver<LinkFrame>,
        prune_interval: Duration,
    ) -> SessionResult<Self> {
        if prune_interval.is_zero() {
            return Err(SessionError::InvalidConfig(
                "prune interval must be positive".to_string(),
            ));
        }
        Ok(Self {
            router,
            inbound_rx,
            prune_interval,
        })
    }

    /// Run the service event loop.
    ///
    /// Runs until the transport drops its inbound sender, then detaches every
    /// link so no settlement handle is left pending.
    pub async fn run(mut self) {
        let mut prune = tokio::time::interval_at(
            tokio::time::Instant::now() + self.prune_interval,
            self.prune_interval,
        );
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = self.inbound_rx.recv() => match frame {
                    Some(frame) => self.handle_frame(frame),
                    None => {
                        debug!("Inbound stream closed, session shutting down");
                        break;
                    }
                },
                _ = prune.tick() => {
                    self.router.prune();
                }
            }
        }

        let error = ErrorCondition::new(ErrorCondition::DETACH_FORCED)
            .with_description("session closed");
        let pending = self.router.detach_all(Some(error));
        info!(pending, "Session closed");
    }

    /// Convert self into a spawnable future.
    pub async fn into_task(self) {
        self.run().await;
    }

    fn handle_frame(&self, frame: LinkFrame) {
        match self.router.dispatch_incoming(frame) {
            Ok(()) => {}
            // Already logged by the router; the session carries on.
            Err(SessionError::UnknownLink(_) | SessionError::ProtocolViolation { .. }) => {}
            Err(err) => warn!(%err, "Failed to apply inbound frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::SessionArgs;
    use crate::create_session;
    use assert_matches::assert_matches;
    use tern_link::{DefaultLinkConfig, SettlementOutcome};
    use tern_proto::{
        Attach, DeliveryId, Disposition, Flow, Handle, Outcome, ReceiverSettleMode, Role,
        SenderSettleMode,
    };

    fn attach() -> Attach {
        Attach {
            name: "service".to_string(),
            handle: Handle::new(0),
            role: Role::Sender,
            snd_settle_mode: SenderSettleMode::Unsettled,
            rcv_settle_mode: ReceiverSettleMode::First,
            initial_delivery_count: 0,
        }
    }

    #[tokio::test]
    async fn test_frames_applied_in_order() {
        let (service, router, transport) = create_session(&SessionArgs::default()).expect("valid args");
        let task = tokio::spawn(service.into_task());
        let link = router.attach_sender(&attach(), DefaultLinkConfig).expect("attach");
        let mut events = link.subscribe();

        transport
            .inbound
            .send(LinkFrame::new(
                Handle::new(0),
                Flow {
                    delivery_count: 0,
                    link_credit: 1,
                    ..Flow::default()
                },
            ))
            .expect("service running");
        // Unknown handles are dropped without stopping the loop.
        transport
            .inbound
            .send(LinkFrame::new(Handle::new(7), Flow::default()))
            .expect("service running");

        events.recv().await.expect("flow applied");
        let pending = link.send("x").expect("credit");

        transport
            .inbound
            .send(LinkFrame::new(
                Handle::new(0),
                Disposition::single(Role::Receiver, DeliveryId::new(0), true, Outcome::Accepted),
            ))
            .expect("service running");
        assert_eq!(pending.wait().await, SettlementOutcome::Accepted);

        drop(transport);
        task.await.expect("service exits");
    }

    #[test]
    fn test_zero_prune_interval_rejected() {
        let args = SessionArgs {
            prune_interval_secs: 0,
        };
        assert_matches!(create_session(&args), Err(SessionError::InvalidConfig(_)));

        let (router, _outgoing) = SessionRouter::channel();
        let (_inbound, inbound_rx) = mpsc::unbounded_channel();
        assert_matches!(
            SessionService::new(Arc::new(router), inbound_rx, Duration::ZERO),
            Err(SessionError::InvalidConfig(_))
        );
    }

    #[tokio::test]
    async fn test_closed_inbound_detaches_links() {
        let (service, router, transport) = create_session(&SessionArgs::default()).expect("valid args");
        let link = router.attach_sender(&attach(), DefaultLinkConfig).expect("attach");
        router
            .dispatch_incoming(LinkFrame::new(
                Handle::new(0),
                Flow {
                    delivery_count: 0,
                    link_credit: 2,
                    ..Flow::default()
                },
            ))
            .expect("flow");
        let first = link.send("a").expect("credit");
        let second = link.send("b").expect("credit");

        drop(transport.inbound);
        service.run().await;

        assert_eq!(first.wait().await, SettlementOutcome::LinkClosed);
        assert_eq!(second.wait().await, SettlementOutcome::LinkClosed);
        assert!(router.is_empty());
    }
}
