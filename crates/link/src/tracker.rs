//! Per-link delivery tracking.
//!
//! The tracker is the ground truth for whether a delivery is settled and with
//! what outcome. Settlement is monotonic: a delivery moves from unsettled to
//! settled at most once, and anything arriving for it afterwards is ignored.
//!
//! # Retention
//!
//! Settled deliveries stay in the tracker for a retention window so that
//! redundant dispositions and retransmitted transfers are recognised as such.
//! [`DeliveryTracker::prune`] drops them once the window has passed.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::{Duration, Instant};

use tern_proto::{DeliveryId, DeliveryTag, Disposition, Handle, Outcome, Role};
use tracing::trace;

use crate::error::{LinkError, LinkResult};
use crate::handle::{Resolver, SettlementHandle, SettlementOutcome};
use crate::policy::SettlementPolicy;

/// One outstanding or recently settled delivery.
#[derive(Debug)]
pub struct Delivery {
    id: DeliveryId,
    tag: DeliveryTag,
    role: Role,
    settled: bool,
    outcome: Outcome,
    settled_at: Option<Instant>,
    resolver: Option<Resolver>,
}

impl Delivery {
    fn new(id: DeliveryId, tag: DeliveryTag, role: Role) -> Self {
        Self {
            id,
            tag,
            role,
            settled: false,
            outcome: Outcome::None,
            settled_at: None,
            resolver: None,
        }
    }

    /// The delivery id.
    pub fn id(&self) -> DeliveryId {
        self.id
    }

    /// The sender-chosen tag.
    pub fn tag(&self) -> &DeliveryTag {
        &self.tag
    }

    /// Role of the link tracking this delivery.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the delivery is settled.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Current outcome.
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Settle with `outcome`. Returns `false` if already settled.
    fn settle(&mut self, outcome: Outcome, now: Instant) -> bool {
        if self.settled {
            return false;
        }
        self.settled = true;
        self.outcome = outcome;
        self.settled_at = Some(now);
        if let Some(resolver) = self.resolver.take() {
            resolver.resolve(SettlementOutcome::from(self.outcome.clone()));
        }
        true
    }
}

/// Whether [`DeliveryTracker::record_incoming`] created a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// A new delivery.
    New,
    /// The id is already tracked; the transfer is a retransmission.
    Duplicate,
}

/// Deliveries touched by one disposition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispositionReport {
    /// Deliveries that became settled.
    pub settled: Vec<DeliveryId>,
    /// Deliveries that received an outcome but remain unsettled.
    pub updated: Vec<DeliveryId>,
}

impl DispositionReport {
    /// Whether the disposition changed nothing.
    pub fn is_empty(&self) -> bool {
        self.settled.is_empty() && self.updated.is_empty()
    }
}

/// Delivery-id keyed state for one link.
#[derive(Debug)]
pub struct DeliveryTracker {
    handle: Handle,
    role: Role,
    next_id: DeliveryId,
    retention: Duration,
    deliveries: BTreeMap<DeliveryId, Delivery>,
}

impl DeliveryTracker {
    /// Create an empty tracker for the link `handle`.
    pub fn new(handle: Handle, role: Role, retention: Duration) -> Self {
        Self {
            handle,
            role,
            next_id: DeliveryId::default(),
            retention,
            deliveries: BTreeMap::new(),
        }
    }

    /// The id the next outgoing delivery will get.
    pub fn next_delivery_id(&self) -> DeliveryId {
        self.next_id
    }

    /// Allocate an id and track a new unsettled outgoing delivery.
    pub fn record_outgoing(&mut self, tag: DeliveryTag) -> DeliveryId {
        let id = self.next_id;
        self.next_id = id.next();
        self.deliveries.insert(id, Delivery::new(id, tag, self.role));
        trace!(handle = %self.handle, delivery_id = %id, "Recorded outgoing delivery");
        id
    }

    /// Allocate an id for a delivery that is settled as it is sent.
    pub fn record_presettled(&mut self, tag: DeliveryTag) -> DeliveryId {
        let id = self.record_outgoing(tag);
        if let Some(delivery) = self.deliveries.get_mut(&id) {
            delivery.settle(Outcome::None, Instant::now());
        }
        id
    }

    /// Track a delivery announced by an incoming transfer.
    ///
    /// Idempotent: an id that is still tracked is reported as a duplicate and
    /// left untouched.
    pub fn record_incoming(&mut self, id: DeliveryId, tag: DeliveryTag, settled: bool) -> Recorded {
        match self.deliveries.entry(id) {
            Entry::Occupied(_) => {
                trace!(handle = %self.handle, delivery_id = %id, "Duplicate transfer");
                Recorded::Duplicate
            }
            Entry::Vacant(entry) => {
                let delivery = entry.insert(Delivery::new(id, tag, self.role));
                if settled {
                    delivery.settle(Outcome::None, Instant::now());
                }
                trace!(handle = %self.handle, delivery_id = %id, settled, "Recorded incoming delivery");
                Recorded::New
            }
        }
    }

    /// Create a handle resolving when `id` settles.
    ///
    /// Returns `None` if the id is not tracked. A handle for a settled
    /// delivery is resolved already.
    pub fn watch(&mut self, id: DeliveryId) -> Option<SettlementHandle> {
        let delivery = self.deliveries.get_mut(&id)?;
        let (handle, resolver) = SettlementHandle::pair(id);
        if delivery.settled {
            resolver.resolve(SettlementOutcome::from(delivery.outcome.clone()));
        } else {
            delivery.resolver = Some(resolver);
        }
        Some(handle)
    }

    /// Apply a remote disposition to the inclusive range `first..=last`.
    ///
    /// Ids without a delivery, and deliveries already settled, are skipped. A
    /// range whose `last` is numerically below `first` wraps around `u32::MAX`.
    pub fn apply_disposition(
        &mut self,
        first: DeliveryId,
        last: DeliveryId,
        settled: bool,
        outcome: &Outcome,
    ) -> DispositionReport {
        let now = Instant::now();
        let mut report = DispositionReport::default();

        let (head, tail) = if first <= last {
            ((first, last), None)
        } else {
            ((first, DeliveryId::new(u32::MAX)), Some((DeliveryId::new(0), last)))
        };

        for (low, high) in core::iter::once(head).chain(tail) {
            for (id, delivery) in self.deliveries.range_mut(low..=high) {
                if delivery.settled {
                    continue;
                }
                if settled {
                    let outcome = if outcome.is_terminal() {
                        outcome.clone()
                    } else {
                        delivery.outcome.clone()
                    };
                    delivery.settle(outcome, now);
                    report.settled.push(*id);
                } else if outcome.is_terminal() && delivery.outcome != *outcome {
                    delivery.outcome = outcome.clone();
                    report.updated.push(*id);
                }
            }
        }

        trace!(
            handle = %self.handle,
            %first,
            %last,
            settled = report.settled.len(),
            updated = report.updated.len(),
            "Applied disposition"
        );
        report
    }

    /// Settle a delivery locally without producing a frame.
    pub fn settle_local(&mut self, id: DeliveryId, outcome: Outcome) -> LinkResult<()> {
        let handle = self.handle;
        let delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or(LinkError::UnknownDelivery {
                handle,
                delivery_id: id,
            })?;
        if !delivery.settle(outcome, Instant::now()) {
            return Err(already_settled(handle, id));
        }
        Ok(())
    }

    /// Application-driven disposition of one delivery.
    ///
    /// Returns the disposition to send, or `None` when the link's mode
    /// never exchanges dispositions.
    pub fn local_disposition(
        &mut self,
        id: DeliveryId,
        outcome: Outcome,
        settle: bool,
        policy: &SettlementPolicy,
    ) -> LinkResult<Option<Disposition>> {
        let handle = self.handle;
        let delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or(LinkError::UnknownDelivery {
                handle,
                delivery_id: id,
            })?;
        if delivery.settled {
            return Err(already_settled(handle, id));
        }

        if settle {
            delivery.settle(outcome.clone(), Instant::now());
        } else {
            delivery.outcome = outcome.clone();
        }

        if !policy.emits_dispositions() {
            return Ok(None);
        }
        Ok(Some(Disposition::single(self.role, id, settle, outcome)))
    }

    /// Drop settled deliveries whose retention window has passed.
    pub fn prune(&mut self) -> usize {
        self.prune_at(Instant::now())
    }

    /// [`prune`](Self::prune) against an explicit clock reading.
    pub fn prune_at(&mut self, now: Instant) -> usize {
        let retention = self.retention;
        let before = self.deliveries.len();
        self.deliveries.retain(|_, delivery| match delivery.settled_at {
            Some(at) => now.saturating_duration_since(at) < retention,
            None => true,
        });
        before - self.deliveries.len()
    }

    /// Resolve every unsettled delivery as closed and forget all deliveries.
    ///
    /// Returns how many unsettled deliveries were resolved.
    pub fn close(&mut self) -> usize {
        let mut closed = 0;
        for delivery in self.deliveries.values_mut() {
            if delivery.settled {
                continue;
            }
            closed += 1;
            if let Some(resolver) = delivery.resolver.take() {
                resolver.resolve(SettlementOutcome::LinkClosed);
            }
        }
        self.deliveries.clear();
        closed
    }

    /// Undo the latest outgoing record, as if it never happened.
    ///
    /// The id is handed out again by the next record. Returns `None` and
    /// changes nothing unless `id` is the most recently allocated one.
    pub fn unrecord_outgoing(&mut self, id: DeliveryId) -> Option<Delivery> {
        if id.next() != self.next_id {
            return None;
        }
        let delivery = self.deliveries.remove(&id)?;
        self.next_id = id;
        trace!(handle = %self.handle, delivery_id = %id, "Unrecorded outgoing delivery");
        Some(delivery)
    }

    /// Look up a delivery.
    pub fn get(&self, id: DeliveryId) -> Option<&Delivery> {
        self.deliveries.get(&id)
    }

    /// Ids of unsettled deliveries, in id order.
    pub fn unsettled(&self) -> impl Iterator<Item = DeliveryId> + '_ {
        self.deliveries
            .values()
            .filter(|delivery| !delivery.settled)
            .map(Delivery::id)
    }

    /// Number of unsettled deliveries.
    pub fn unsettled_count(&self) -> usize {
        self.unsettled().count()
    }

    /// Number of tracked deliveries, settled ones included.
    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

fn already_settled(handle: Handle, delivery_id: DeliveryId) -> LinkError {
    LinkError::InvalidState {
        handle,
        delivery_id,
        reason: "delivery already settled".to_string(),
    }
}
