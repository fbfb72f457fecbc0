use core::fmt;
use std::sync::Arc;
use std::time::Instant;

use tern_proto::{
    Attach, DeliveryId, Disposition, ErrorCondition, Flow, Handle, Outcome, Role, Transfer,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use super::stream::{IncomingMessage, MessageStream};
use super::LinkCore;
use crate::config::LinkConfig;
use crate::credit::CreditController;
use crate::error::{LinkError, LinkResult};
use crate::event::LinkEvent;
use crate::policy::SettlementPolicy;
use crate::sink::FrameSink;
use crate::tracker::{DeliveryTracker, Recorded};

struct ReceiverState {
    tracker: DeliveryTracker,
    credit: CreditController,
    detached: bool,
    messages: Option<mpsc::UnboundedSender<IncomingMessage>>,
}

/// The receiving end of a link.
///
/// Messages are buffered from the moment the link exists; read them from the
/// [`MessageStream`] returned alongside the link.
#[derive(Clone)]
pub struct ReceiverLink {
    core: Arc<LinkCore<ReceiverState>>,
}

impl fmt::Debug for ReceiverLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverLink")
            .field("handle", &self.core.handle)
            .field("name", &self.core.name)
            .field("mode", &self.core.policy.mode())
            .finish_non_exhaustive()
    }
}

impl ReceiverLink {
    /// Create the link for a completed attach.
    ///
    /// No credit is granted yet; call [`add_credits`](Self::add_credits) once
    /// the link is reachable by inbound frames.
    pub fn new(
        attach: &Attach,
        config: impl LinkConfig,
        sink: Arc<dyn FrameSink>,
    ) -> (Self, MessageStream) {
        let (messages, stream) = MessageStream::channel();
        let state = ReceiverState {
            tracker: DeliveryTracker::new(attach.handle, Role::Receiver, config.retention()),
            credit: CreditController::new(
                attach.handle,
                Role::Receiver,
                config.credit_policy(),
                attach.initial_delivery_count,
            ),
            detached: false,
            messages: Some(messages),
        };
        let core = LinkCore::new(attach, sink, state);
        debug!(handle = %core.handle, name = %core.name, mode = %core.policy.mode(), "Attached receiver");
        (
            Self {
                core: Arc::new(core),
            },
            stream,
        )
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

    /// Credit outstanding at the sender.
    pub fn credit(&self) -> u32 {
        self.core.state.lock().credit.available()
    }

    /// Received deliveries not yet settled.
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

    /// Grant the sender `n` more units of credit.
    pub fn add_credits(&self, n: u32) -> LinkResult<()> {
        let core = &*self.core;
        let mut state = core.state.lock();
        if state.detached {
            return Err(LinkError::Detached {
                handle: core.handle,
            });
        }
        let flow = state.credit.grant(n);
        core.enqueue(flow)?;
        core.metrics.credit_grants_total.increment(1);
        Ok(())
    }

    /// Ask the sender to use up its outstanding credit.
    ///
    /// Completion is published as [`LinkEvent::Drained`].
    pub fn drain(&self) -> LinkResult<()> {
        let core = &*self.core;
        let mut state = core.state.lock();
        if state.detached {
            return Err(LinkError::Detached {
                handle: core.handle,
            });
        }
        let flow = state.credit.request_drain();
        core.enqueue(flow)
    }

    /// Accept a delivery.
    pub fn accept(&self, delivery_id: DeliveryId) -> LinkResult<()> {
        self.dispose(delivery_id, Outcome::Accepted)
    }

    /// Reject a delivery.
    pub fn reject(&self, delivery_id: DeliveryId, error: Option<ErrorCondition>) -> LinkResult<()> {
        self.dispose(delivery_id, Outcome::Rejected { error })
    }

    /// Release a delivery back to the sender.
    pub fn release(&self, delivery_id: DeliveryId) -> LinkResult<()> {
        self.dispose(delivery_id, Outcome::Released)
    }

    /// Modify a delivery.
    pub fn modify(
        &self,
        delivery_id: DeliveryId,
        delivery_failed: bool,
        undeliverable_here: bool,
    ) -> LinkResult<()> {
        self.dispose(
            delivery_id,
            Outcome::Modified {
                delivery_failed,
                undeliverable_here,
            },
        )
    }

    fn dispose(&self, delivery_id: DeliveryId, outcome: Outcome) -> LinkResult<()> {
        let core = &*self.core;
        let mut state = core.state.lock();
        if state.detached {
            return Err(LinkError::Detached {
                handle: core.handle,
            });
        }
        if !core.policy.allows_manual_disposition() {
            return Err(LinkError::InvalidState {
                handle: core.handle,
                delivery_id,
                reason: format!("{} links settle on arrival", core.policy.mode()),
            });
        }

        trace!(handle = %core.handle, %delivery_id, outcome = outcome.as_ref(), "Disposing delivery");
        // Manual dispositions are final: settle here and send the settled state.
        if let Some(disposition) =
            state.tracker.local_disposition(delivery_id, outcome, true, &core.policy)?
        {
            core.enqueue(disposition)?;
            core.metrics.dispositions_sent_total.increment(1);
        }
        Ok(())
    }

    /// Apply a transfer from the remote sender.
    ///
    /// Retransmissions of a tracked delivery are dropped without touching
    /// credit or the application.
    pub fn on_transfer(&self, transfer: Transfer) -> LinkResult<()> {
        let core = &*self.core;
        let mut state = core.state.lock();
        if state.detached {
            return Ok(());
        }

        let Transfer {
            delivery_id,
            delivery_tag,
            settled,
            payload,
        } = transfer;

        if state.tracker.record_incoming(delivery_id, delivery_tag.clone(), settled)
            == Recorded::Duplicate
        {
            core.metrics.duplicate_transfers_total.increment(1);
            debug!(handle = %core.handle, %delivery_id, "Dropped duplicate transfer");
            return Ok(());
        }
        core.metrics.transfers_received_total.increment(1);

        let credit = state.credit.on_transfer();

        let mut delivered_settled = settled;
        if !settled && core.policy.auto_dispose_on_transfer() {
            state.tracker.settle_local(delivery_id, Outcome::Accepted)?;
            core.enqueue(Disposition::single(
                Role::Receiver,
                delivery_id,
                true,
                Outcome::Accepted,
            ))?;
            core.metrics.dispositions_sent_total.increment(1);
            delivered_settled = true;
        }

        if let Some(messages) = &state.messages {
            let message = IncomingMessage {
                handle: core.handle,
                delivery_id,
                delivery_tag,
                settled: delivered_settled,
                payload,
            };
            if messages.send(message).is_err() {
                trace!(handle = %core.handle, %delivery_id, "Message stream dropped");
            }
        }

        if let Some(flow) = credit.reply {
            core.enqueue(flow)?;
            core.metrics.credit_grants_total.increment(1);
        }
        if credit.drained {
            core.publish(LinkEvent::Drained);
        }
        Ok(())
    }

    /// Apply a disposition from the remote sender.
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
        trace!(
            handle = %core.handle,
            first = %disposition.first,
            %last,
            settled = report.settled.len(),
            "Disposition applied to receiver"
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

    /// Apply a flow from the remote sender.
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

    /// Detach the link and end its message stream.
    ///
    /// Returns how many received deliveries were still unsettled.
    pub fn close(&self, error: Option<ErrorCondition>) -> usize {
        let core = &*self.core;
        let mut state = core.state.lock();
        if state.detached {
            return 0;
        }
        state.detached = true;
        state.messages = None;
        let pending = state.tracker.close();
        debug!(handle = %core.handle, pending, "Detached receiver");
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
}
