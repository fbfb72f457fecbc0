//! Per-link credit flow.
//!
//! # Credit Arithmetic
//!
//! A receiver grants credit by advertising its view of the sender's
//! `delivery-count` together with `link-credit`. The sender derives how much
//! it may still send from that advertisement:
//!
//! ```text
//! available = delivery_count_receiver + link_credit - delivery_count_sender
//! ```
//!
//! All counters are 32-bit serial numbers; a "negative" result means no
//! credit is left.
//!
//! # Replenishment
//!
//! Receivers consume one unit per arriving transfer and may grant more right
//! away according to their [`CreditPolicy`].

use serde::{Deserialize, Serialize};
use tern_proto::{Flow, Handle, Role};
use tracing::{debug, warn};

use crate::constants::DEFAULT_CREDIT_QUANTUM;
use crate::error::{LinkError, LinkResult};

/// How a receiver replaces credit consumed by arriving transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "policy")]
pub enum CreditPolicy {
    /// The application grants credit explicitly.
    Manual,
    /// Grant `quantum` units after every arrival.
    Replenish {
        /// Units granted per arrival.
        quantum: u32,
    },
    /// Top credit back up to `window` once it falls to half of it.
    RefreshAtHalf {
        /// Target outstanding credit.
        window: u32,
    },
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self::Replenish {
            quantum: DEFAULT_CREDIT_QUANTUM,
        }
    }
}

impl CreditPolicy {
    /// Credit to grant after an arrival left `available` units outstanding.
    pub const fn replenish_amount(&self, available: u32) -> u32 {
        match *self {
            Self::Manual => 0,
            Self::Replenish { quantum } => quantum,
            Self::RefreshAtHalf { window } => {
                if available <= window / 2 {
                    window.saturating_sub(available)
                } else {
                    0
                }
            }
        }
    }
}

/// Result of reconciling a remote flow frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowUpdate {
    /// Credit available after the update.
    pub available: u32,
    /// A drain completed: no credit is left until the next grant.
    pub drained: bool,
    /// Flow state to send back, if the remote asked for it or a drain consumed credit.
    pub reply: Option<Flow>,
}

/// Credit window of one link.
#[derive(Debug)]
pub struct CreditController {
    handle: Handle,
    role: Role,
    available: u32,
    delivery_count: u32,
    drain: bool,
    policy: CreditPolicy,
}

impl CreditController {
    /// Create a controller with no credit.
    pub fn new(handle: Handle, role: Role, policy: CreditPolicy, initial_delivery_count: u32) -> Self {
        Self {
            handle,
            role,
            available: 0,
            delivery_count: initial_delivery_count,
            drain: false,
            policy,
        }
    }

    /// Credit granted and not yet consumed.
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Deliveries attempted on the link so far.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Whether a drain is in progress.
    pub fn drain(&self) -> bool {
        self.drain
    }

    /// The replenishment policy.
    pub fn policy(&self) -> CreditPolicy {
        self.policy
    }

    /// Current state as a flow frame.
    pub fn flow(&self) -> Flow {
        Flow {
            delivery_count: self.delivery_count,
            link_credit: self.available,
            drain: self.drain,
            echo: false,
        }
    }

    /// Grant `n` more units (receiver). Returns the flow advertising the new total.
    pub fn grant(&mut self, n: u32) -> Flow {
        self.available = self.available.saturating_add(n);
        debug!(handle = %self.handle, granted = n, available = self.available, "Granted credit");
        self.flow()
    }

    /// Ask the sender to use up its credit now (receiver).
    pub fn request_drain(&mut self) -> Flow {
        self.drain = true;
        debug!(handle = %self.handle, available = self.available, "Requested drain");
        self.flow()
    }

    /// Account for an arriving transfer (receiver).
    ///
    /// Consumes one unit and applies the replenishment policy. The reply
    /// carries the flow to send if credit was granted. An arrival that uses
    /// up the credit of a pending drain completes it and grants nothing.
    pub fn on_transfer(&mut self) -> FlowUpdate {
        self.delivery_count = self.delivery_count.wrapping_add(1);
        if self.available == 0 {
            warn!(handle = %self.handle, "Transfer arrived without credit");
        } else {
            self.available -= 1;
        }

        let drained = self.drain && self.available == 0;
        let reply = if drained {
            self.drain = false;
            debug!(handle = %self.handle, "Drain completed by transfer");
            None
        } else {
            self.auto_replenish()
        };

        FlowUpdate {
            available: self.available,
            drained,
            reply,
        }
    }

    /// Grant the policy's replacement credit, unless a drain is in progress.
    pub fn auto_replenish(&mut self) -> Option<Flow> {
        if self.drain {
            return None;
        }
        let amount = self.policy.replenish_amount(self.available);
        (amount > 0).then(|| self.grant(amount))
    }

    /// Take one unit of credit for a send (sender).
    ///
    /// Fails without side effects when no credit is available.
    pub fn consume(&mut self) -> LinkResult<()> {
        if self.available == 0 {
            return Err(LinkError::CreditExhausted {
                handle: self.handle,
            });
        }
        self.available -= 1;
        self.delivery_count = self.delivery_count.wrapping_add(1);
        Ok(())
    }

    /// Return a unit taken by [`consume`](Self::consume) for a send that never left (sender).
    pub fn refund(&mut self) {
        self.available = self.available.saturating_add(1);
        self.delivery_count = self.delivery_count.wrapping_sub(1);
    }

    /// Reconcile local counters with a flow frame from the remote.
    ///
    /// The remote is authoritative for its own counters: a sender takes the
    /// receiver's credit limit, a receiver takes the sender's delivery count.
    pub fn on_flow(&mut self, flow: &Flow) -> FlowUpdate {
        let mut drained = false;
        let mut reply = None;

        match self.role {
            Role::Sender => {
                let limit = flow.delivery_count.wrapping_add(flow.link_credit);
                self.available = serial_remaining(limit, self.delivery_count);
                self.drain = flow.drain;

                if flow.drain {
                    // Nothing is queued locally, so draining uses up the credit at once.
                    self.delivery_count = self.delivery_count.wrapping_add(self.available);
                    self.available = 0;
                    drained = true;
                    reply = Some(self.flow());
                } else if flow.echo {
                    reply = Some(self.flow());
                }
            }
            Role::Receiver => {
                let limit = self.delivery_count.wrapping_add(self.available);
                self.available = serial_remaining(limit, flow.delivery_count);
                self.delivery_count = flow.delivery_count;

                if self.drain && self.available == 0 {
                    self.drain = false;
                    drained = true;
                }
                if flow.echo {
                    reply = Some(self.flow());
                }
            }
        }

        debug!(
            handle = %self.handle,
            role = %self.role,
            available = self.available,
            delivery_count = self.delivery_count,
            drained,
            "Applied flow"
        );

        FlowUpdate {
            available: self.available,
            drained,
            reply,
        }
    }
}

/// `limit - count` in serial arithmetic, floored at zero.
fn serial_remaining(limit: u32, count: u32) -> u32 {
    let diff = limit.wrapping_sub(count);
    if diff < (1 << 31) { diff } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn sender() -> CreditController {
        CreditController::new(Handle::new(0), Role::Sender, CreditPolicy::Manual, 0)
    }

    fn receiver(policy: CreditPolicy) -> CreditController {
        CreditController::new(Handle::new(1), Role::Receiver, policy, 0)
    }

    #[test]
    fn test_consume_without_credit_fails() {
        let mut credit = sender();
        assert_matches!(credit.consume(), Err(LinkError::CreditExhausted { .. }));
        assert_eq!(credit.delivery_count(), 0);
    }

    #[test]
    fn test_sender_takes_credit_from_flow() {
        let mut credit = sender();
        let update = credit.on_flow(&Flow {
            delivery_count: 0,
            link_credit: 2,
            ..Flow::default()
        });
        assert_eq!(update.available, 2);
        assert!(!update.drained);

        credit.consume().expect("first unit");
        credit.consume().expect("second unit");
        assert_matches!(credit.consume(), Err(LinkError::CreditExhausted { .. }));
        assert_eq!(credit.delivery_count(), 2);
    }

    #[test]
    fn test_refund_restores_consumed_unit() {
        let mut credit = sender();
        credit.on_flow(&Flow {
            delivery_count: 0,
            link_credit: 1,
            ..Flow::default()
        });
        credit.consume().expect("credit");
        credit.refund();

        assert_eq!(credit.available(), 1);
        assert_eq!(credit.delivery_count(), 0);
    }

    #[test]
    fn test_stale_flow_accounts_for_sent_deliveries() {
        let mut credit = sender();
        credit.on_flow(&Flow {
            delivery_count: 0,
            link_credit: 5,
            ..Flow::default()
        });
        credit.consume().expect("credit");
        credit.consume().expect("credit");

        // Receiver re-advertises its original limit before seeing our transfers.
        let update = credit.on_flow(&Flow {
            delivery_count: 0,
            link_credit: 5,
            ..Flow::default()
        });
        assert_eq!(update.available, 3);
    }

    #[test]
    fn test_sender_drain_uses_up_credit() {
        let mut credit = sender();
        let update = credit.on_flow(&Flow {
            delivery_count: 0,
            link_credit: 4,
            drain: true,
            echo: false,
        });

        assert!(update.drained);
        assert_eq!(update.available, 0);
        assert_eq!(credit.delivery_count(), 4);
        let reply = update.reply.expect("drain reply");
        assert_eq!(reply.delivery_count, 4);
        assert_eq!(reply.link_credit, 0);
    }

    #[test]
    fn test_echo_requests_reply() {
        let mut credit = sender();
        let update = credit.on_flow(&Flow {
            delivery_count: 0,
            link_credit: 1,
            drain: false,
            echo: true,
        });
        assert_eq!(update.reply.map(|flow| flow.link_credit), Some(1));
    }

    #[test]
    fn test_receiver_grant_advertises_total() {
        let mut credit = receiver(CreditPolicy::Manual);
        credit.grant(3);
        let flow = credit.grant(2);
        assert_eq!(flow.link_credit, 5);
        assert_eq!(flow.delivery_count, 0);
    }

    #[test]
    fn test_manual_policy_never_replenishes() {
        let mut credit = receiver(CreditPolicy::Manual);
        credit.grant(1);
        assert_eq!(credit.on_transfer().reply, None);
        assert_eq!(credit.available(), 0);
        assert_eq!(credit.delivery_count(), 1);
    }

    #[test]
    fn test_replenish_policy_grants_one_for_one() {
        let mut credit = receiver(CreditPolicy::Replenish { quantum: 1 });
        credit.grant(10);

        let flow = credit.on_transfer().reply.expect("replenished");
        assert_eq!(flow.link_credit, 10);
        assert_eq!(flow.delivery_count, 1);
    }

    #[test]
    fn test_refresh_at_half_policy() {
        let mut credit = receiver(CreditPolicy::RefreshAtHalf { window: 4 });
        credit.grant(4);

        assert_eq!(credit.on_transfer().reply, None);
        let flow = credit.on_transfer().reply.expect("refreshed at half");
        assert_eq!(flow.link_credit, 4);
    }

    #[test]
    fn test_receiver_drain_completes_on_sender_flow() {
        let mut credit = receiver(CreditPolicy::Replenish { quantum: 1 });
        credit.grant(3);
        credit.request_drain();

        let update = credit.on_flow(&Flow {
            delivery_count: 3,
            link_credit: 0,
            drain: true,
            echo: false,
        });
        assert!(update.drained);
        assert_eq!(update.available, 0);
        assert!(!credit.drain());
        assert_eq!(credit.delivery_count(), 3);
    }

    #[test]
    fn test_no_replenish_while_draining() {
        let mut credit = receiver(CreditPolicy::Replenish { quantum: 1 });
        credit.grant(2);
        credit.request_drain();
        assert_eq!(credit.on_transfer().reply, None);
        assert_eq!(credit.available(), 1);
    }

    #[test]
    fn test_transfer_completing_drain_grants_nothing() {
        let mut credit = receiver(CreditPolicy::Replenish { quantum: 1 });
        credit.grant(2);
        credit.request_drain();

        let first = credit.on_transfer();
        assert!(!first.drained);
        assert_eq!(first.reply, None);

        let last = credit.on_transfer();
        assert!(last.drained);
        assert_eq!(last.reply, None);
        assert_eq!(last.available, 0);
        assert!(!credit.drain());
        assert_eq!(credit.delivery_count(), 2);

        // Credit only comes back through an explicit grant.
        assert_eq!(credit.grant(1).link_credit, 1);
    }

    #[test]
    fn test_refresh_at_half_stays_quiet_after_drain() {
        let mut credit = receiver(CreditPolicy::RefreshAtHalf { window: 2 });
        credit.grant(1);
        credit.request_drain();

        let update = credit.on_transfer();
        assert!(update.drained);
        assert_eq!(update.reply, None);
        assert_eq!(credit.available(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Grant(u32),
        Consume,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![(0u32..4).prop_map(Op::Grant), Just(Op::Consume)]
    }

    proptest! {
        #[test]
        fn prop_credit_never_overdrawn(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let mut credit = sender();
            let mut model: u32 = 0;

            for op in ops {
                match op {
                    Op::Grant(n) => {
                        let flow = Flow {
                            delivery_count: credit.delivery_count(),
                            link_credit: credit.available() + n,
                            ..Flow::default()
                        };
                        credit.on_flow(&flow);
                        model += n;
                    }
                    Op::Consume => {
                        let result = credit.consume();
                        if model == 0 {
                            prop_assert!(result.is_err());
                        } else {
                            prop_assert!(result.is_ok());
                            model -= 1;
                        }
                    }
                }
                prop_assert_eq!(credit.available(), model);
            }
        }
    }
}
