use core::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tern_proto::{
    Attach, DeliveryTag, Disposition, ErrorCondition, Flow, Handle, Role, Transfer,
};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::LinkCore;
use crate::config::LinkConfig;
use crate::credit::CreditController;
use crate::error::{LinkError, LinkResult};
use crate::event::LinkEvent;
use crate::handle::SettlementHandle;
use crate::policy::SettlementPolicy;
use crate::sink::FrameSink;
use crate::tracker::DeliveryTracker;

struct SenderState {
    tracker: DeliveryTracker,
    credit: CreditController,
    detached: bool,
}

/// The sending end of a link.
///
/// Sends are refused until the remote receiver grants credit with a flow.
#[derive(Clone)]
pub struct SenderLink {
    core: Arc<LinkCore<SenderState>>,
}

impl fmt::Debug for SenderLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderLink")
            .field("handle", &self.core.handle)
            .field("name", &self.core.name)
            .field("mode", &self.core.policy.mode())
            .finish_non_exhaustive()
    }
}

impl SenderLink {
    /// Create the link for a completed attach.
    pub fn new(attach: &Attach, config: impl LinkConfig, sink: Arc<dyn FrameSink>) -> Self {
        let state = SenderState {
            tracker: DeliveryTracker::new(attach.handle, Role::Sender, config.retention()),
            credit: CreditController::new(
                attach.handle,
                Role::Sender,
                config.credit_policy(),
                attach.initial_delivery_count,
            ),
            detached: false,
        };
        let core = LinkCore::new(attach, sink, state);
        debug!(handle = %core.handle, name = %core.name, mode = %core.policy.mode(), "Attached sender");
        Self {
            core: Arc::new(core),
        }
    }

    /// The link handle.
    pub fn handle(&self) -> Handle {
        self.core.handle
    }

    /// The link name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// The settlement policy fixed at attach.
    pub fn policy(&self) -> SettlementPolicy {
        self.core.policy
    }

    /// Credit left for sends.
    pub fn credit(&self) -> u32 {
        self.core.state.lock().credit.available()
    }

    /// Deliveries sent and not yet settled.
    pub fn unsettled(&self) -> usize {
        self.core.state.lock().tracker.unsettled_count()
    }

    /// Whether the link has been detached.
    pub fn is_detached(&self) -> bool {
        self.core.state.lock().detached
    }

    /// Subscribe to this link's events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.core.events.subscribe()
    }

    /// Send a message, tagging it with its delivery id.
    ///
    /// Takes one unit of credit. The returned handle resolves once the
    /// delivery is settled, immediately for pre-settled links.
    pub fn send(&self, payload: impl Into<Bytes>) -> LinkResult<SettlementHandle> {
        self.send_inner(None, payload.into())
    }

    /// [`send`](Self::send) with an explicit delivery tag.
    pub fn send_with_tag(
        &self,
        tag: DeliveryTag,
        payload: impl Into<Bytes>,
    ) -> LinkResult<SettlementHandle> {
        self.send_inner(Some(tag), payload.into())
    }

    fn send_inner(&self, tag: Option<DeliveryTag>, payload: Bytes) -> LinkResult<SettlementHandle> {
        let core = &*self.core;
        let mut state = core.state.lock();
        if state.detached {
            return Err(LinkError::Detached {
                handle: core.handle,
            });
        }
        if let Err(err) = state.credit.consume() {
            core.metrics.credit_exhausted_total.increment(1);
            debug!(handle = %core.handle, "Send refused, no credit");
            return Err(err);
        }

        let presettled = core.policy.presettle_outgoing();
        let tag = tag.unwrap_or_else(|| DeliveryTag::from_id(state.tracker.next_delivery_id()));
        let delivery_id = if presettled {
            state.tracker.record_presettled(tag.clone())
        } else {
            state.tracker.record_outgoing(tag.clone())
        };

        let transfer = Transfer {
            delivery_id,
            delivery_tag: tag,
            settled: presettled,
            payload,
        };
        if let Err(err) = core.enqueue(transfer) {
            state.tracker.unrecord_outgoing(delivery_id);
            state.credit.refund();
            return Err(err);
        }
        core.metrics.transfers_sent_total.increment(1);
        trace!(handle = %core.handle, %delivery_id, presettled, "Sent transfer");

        state.tracker.watch(delivery_id).ok_or(LinkError::UnknownDelivery {
            handle: core.handle,
            delivery_id,
        })
    }

    /// Apply a disposition from the remote receiver.
    ///
    /// A terminal outcome that arrives unsettled is settled locally and
    /// confirmed with a settling disposition of our own.
    pub fn on_disposition(&self, disposition: &Disposition) -> LinkResult<()> {
        let core = &*self.core;
        core.check_disposition_role(disposition)?;

        let mut state = core.state.lock();
        if state.detached {
            return Ok(());
        }
        let last = disposition.last_or_first();
        let report = state.tracker.apply_disposition(
            disposition.first,
            last,
            disposition.settled,
            &disposition.state,
        );
        core.metrics.dispositions_received_total.increment(1);

        for delivery_id in report.updated {
            state.tracker.settle_local(delivery_id, disposition.state.clone())?;
            core.enqueue(Disposition::single(
                Role::Sender,
                delivery_id,
                true,
                disposition.state.clone(),
            ))?;
            core.metrics.dispositions_sent_total.increment(1);
        }
        trace!(
            handle = %core.handle,
            first = %disposition.first,
            %last,
            settled = report.settled.len(),
            "Disposition applied to sender"
        );

        core.publish(LinkEvent::DispositionReceived {
            role: disposition.role,
            first: disposition.first,
            last,
            settled: disposition.settled,
            state: disposition.state.clone(),
        });
        Ok(())
    }

    /// Apply a flow from the remote receiver.
    pub fn on_flow(&self, flow: &Flow) -> LinkResult<()> {
        let core = &*self.core;
        let mut state = core.state.lock();
        if state.detached {
            return Ok(());
        }
        let update = state.credit.on_flow(flow);
        if let Some(reply) = update.reply {
            core.enqueue(reply)?;
        }

        core.publish(LinkEvent::Flow {
            available: update.available,
        });
        if update.drained {
            core.publish(LinkEvent::Drained);
        }
        Ok(())
    }

    /// Detach the link. Pending sends resolve as [`LinkClosed`].
    ///
    /// Returns how many deliveries were still unsettled.
    ///
    /// [`LinkClosed`]: crate::SettlementOutcome::LinkClosed
    pub fn close(&self, error: Option<ErrorCondition>) -> usize {
        let core = &*self.core;
        let mut state = core.state.lock();
        if state.detached {
            return 0;
        }
        state.detached = true;
        let pending = state.tracker.close();
        debug!(handle = %core.handle, pending, "Detached sender");
        core.publish(LinkEvent::Detached { error });
        pending
    }

    /// Drop settled deliveries past their retention window.
    pub fn prune_at(&self, now: Instant) -> usize {
        let core = &*self.core;
        let pruned = core.state.lock().tracker.prune_at(now);
        core.metrics.deliveries_pruned_total.increment(pruned as u64);
        pruned
    }

    pub(super) fn violation(&self, reason: &str) -> LinkError {
        self.core.violation(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultLinkConfig;
    use crate::handle::SettlementOutcome;
    use crate::link::testing::RecordingSink;
    use assert_matches::assert_matches;
    use tern_proto::{
        DeliveryId, LinkFrame, Outcome, Performative, ReceiverSettleMode, SenderSettleMode,
    };

    fn attach(snd: SenderSettleMode) -> Attach {
        Attach {
            name: "sender".to_string(),
            handle: Handle::new(0),
            role: Role::Sender,
            snd_settle_mode: snd,
            rcv_settle_mode: ReceiverSettleMode::First,
            initial_delivery_count: 0,
        }
    }

    fn sender(snd: SenderSettleMode) -> (SenderLink, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let link = SenderLink::new(&attach(snd), DefaultLinkConfig, sink.clone());
        (link, sink)
    }

    fn grant(link: &SenderLink, credit: u32) {
        link.on_flow(&Flow {
            delivery_count: 0,
            link_credit: credit,
            ..Flow::default()
        })
        .expect("flow");
    }

    fn accepted(first: u32, last: u32, settled: bool) -> Disposition {
        Disposition::range(
            Role::Receiver,
            DeliveryId::new(first),
            DeliveryId::new(last),
            settled,
            Outcome::Accepted,
        )
    }

    #[test]
    fn test_send_without_credit_fails() {
        let (link, sink) = sender(SenderSettleMode::Unsettled);

        assert_matches!(link.send("hello"), Err(LinkError::CreditExhausted { .. }));
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn test_send_resolves_on_settled_disposition() {
        let (link, sink) = sender(SenderSettleMode::Unsettled);
        grant(&link, 2);

        let first = link.send("one").expect("credit");
        let second = link.send("two").expect("credit");
        assert_eq!(link.credit(), 0);
        assert_eq!(link.unsettled(), 2);

        let frames = sink.take();
        assert_eq!(frames.len(), 2);
        assert_matches!(
            &frames[0].body,
            Performative::Transfer(transfer) if !transfer.settled && transfer.payload == "one"
        );

        link.on_disposition(&accepted(0, 1, true)).expect("disposition");
        assert_eq!(first.wait().await, SettlementOutcome::Accepted);
        assert_eq!(second.wait().await, SettlementOutcome::Accepted);
        assert_eq!(link.unsettled(), 0);
    }

    #[test]
    fn test_presettled_send_resolves_immediately() {
        let (link, sink) = sender(SenderSettleMode::Settled);
        grant(&link, 1);

        let mut handle = link.send("{\"llamas\":\"are cool\"}").expect("credit");
        assert_eq!(handle.try_outcome(), Some(SettlementOutcome::SettledUnconfirmed));
        assert_matches!(
            &sink.take()[0].body,
            Performative::Transfer(transfer) if transfer.settled
        );
        assert_eq!(link.unsettled(), 0);
    }

    #[tokio::test]
    async fn test_unsettled_outcome_is_confirmed_by_sender() {
        let (link, sink) = sender(SenderSettleMode::Unsettled);
        grant(&link, 1);
        let handle = link.send("x").expect("credit");
        sink.take();

        link.on_disposition(&accepted(0, 0, false)).expect("disposition");

        assert_eq!(handle.wait().await, SettlementOutcome::Accepted);
        assert_eq!(
            sink.take(),
            vec![LinkFrame::new(
                Handle::new(0),
                Disposition::single(Role::Sender, DeliveryId::new(0), true, Outcome::Accepted)
            )]
        );
    }

    #[test]
    fn test_disposition_from_sender_role_is_violation() {
        let (link, _sink) = sender(SenderSettleMode::Unsettled);
        let disposition = Disposition::single(Role::Sender, DeliveryId::new(0), true, Outcome::Accepted);

        assert_matches!(
            link.on_disposition(&disposition),
            Err(LinkError::ProtocolViolation { .. })
        );
    }

    #[test]
    fn test_duplicate_disposition_is_ignored() {
        let (link, _sink) = sender(SenderSettleMode::Unsettled);
        grant(&link, 1);
        let mut handle = link.send("x").expect("credit");
        let mut events = link.subscribe();

        link.on_disposition(&accepted(0, 0, true)).expect("first");
        link.on_disposition(&Disposition::single(
            Role::Receiver,
            DeliveryId::new(0),
            true,
            Outcome::Released,
        ))
        .expect("second");

        assert_eq!(handle.try_outcome(), Some(SettlementOutcome::Accepted));
        assert_matches!(events.try_recv(), Ok(LinkEvent::DispositionReceived { .. }));
        assert_matches!(events.try_recv(), Ok(LinkEvent::DispositionReceived { .. }));
    }

    #[tokio::test]
    async fn test_close_resolves_pending_and_refuses_sends() {
        let (link, _sink) = sender(SenderSettleMode::Unsettled);
        grant(&link, 3);
        let first = link.send("a").expect("credit");
        let second = link.send("b").expect("credit");

        assert_eq!(link.close(None), 2);
        assert_eq!(first.wait().await, SettlementOutcome::LinkClosed);
        assert_eq!(second.wait().await, SettlementOutcome::LinkClosed);
        assert_matches!(link.send("c"), Err(LinkError::Detached { .. }));
        assert_eq!(link.close(None), 0);
    }

    #[test]
    fn test_drain_consumes_credit_and_replies() {
        let (link, sink) = sender(SenderSettleMode::Unsettled);
        let mut events = link.subscribe();

        link.on_flow(&Flow {
            delivery_count: 0,
            link_credit: 5,
            drain: true,
            echo: false,
        })
        .expect("flow");

        assert_eq!(link.credit(), 0);
        assert_matches!(
            &sink.take()[0].body,
            Performative::Flow(flow) if flow.delivery_count == 5 && flow.link_credit == 0
        );
        assert_eq!(events.try_recv().ok(), Some(LinkEvent::Flow { available: 0 }));
        assert_eq!(events.try_recv().ok(), Some(LinkEvent::Drained));
    }

    #[test]
    fn test_transport_failure_rolls_back_delivery() {
        let (link, sink) = sender(SenderSettleMode::Unsettled);
        grant(&link, 1);
        sink.close();

        assert_matches!(link.send("x"), Err(LinkError::TransportClosed));
        assert_eq!(link.unsettled(), 0);
        assert_eq!(link.credit(), 1);
        assert_matches!(link.send("y"), Err(LinkError::TransportClosed));
        assert_eq!(link.credit(), 1);
    }
}
