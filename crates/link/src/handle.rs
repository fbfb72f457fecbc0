//! Settlement handles returned by sends.

use tern_proto::{DeliveryId, ErrorCondition, Outcome};
use tokio::sync::oneshot;

/// How a sent delivery was finally settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The receiver accepted the message.
    Accepted,
    /// The receiver rejected the message.
    Rejected(Option<ErrorCondition>),
    /// The receiver released the message.
    Released,
    /// The receiver modified the message.
    Modified {
        /// The attempt counted as failed.
        delivery_failed: bool,
        /// The message must not be redelivered to this link.
        undeliverable_here: bool,
    },
    /// Settled without a reported outcome (pre-settled send, or remote settled with no state).
    SettledUnconfirmed,
    /// The link was detached before the delivery settled.
    LinkClosed,
}

impl From<Outcome> for SettlementOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::None => Self::SettledUnconfirmed,
            Outcome::Accepted => Self::Accepted,
            Outcome::Rejected { error } => Self::Rejected(error),
            Outcome::Released => Self::Released,
            Outcome::Modified {
                delivery_failed,
                undeliverable_here,
            } => Self::Modified {
                delivery_failed,
                undeliverable_here,
            },
        }
    }
}

/// Tracker side of a settlement handle. Resolves at most once.
#[derive(Debug)]
pub(crate) struct Resolver(oneshot::Sender<SettlementOutcome>);

impl Resolver {
    /// Resolve the paired handle. A cancelled handle is ignored.
    pub(crate) fn resolve(self, outcome: SettlementOutcome) {
        let _ = self.0.send(outcome);
    }
}

/// Pending settlement of one sent delivery.
///
/// Await it with [`wait`](Self::wait), poll it with
/// [`try_outcome`](Self::try_outcome), or drop it / [`cancel`](Self::cancel)
/// it to stop waiting. Cancelling never affects the delivery itself.
#[derive(Debug)]
pub struct SettlementHandle {
    delivery_id: DeliveryId,
    rx: oneshot::Receiver<SettlementOutcome>,
    outcome: Option<SettlementOutcome>,
}

impl SettlementHandle {
    /// Create a connected handle and resolver pair.
    pub(crate) fn pair(delivery_id: DeliveryId) -> (Self, Resolver) {
        let (tx, rx) = oneshot::channel();
        let handle = Self {
            delivery_id,
            rx,
            outcome: None,
        };
        (handle, Resolver(tx))
    }

    /// The delivery this handle tracks.
    pub fn delivery_id(&self) -> DeliveryId {
        self.delivery_id
    }

    /// Wait for the delivery to settle.
    ///
    /// Resolves with [`SettlementOutcome::LinkClosed`] if the link goes away first.
    pub async fn wait(self) -> SettlementOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        self.rx.await.unwrap_or(SettlementOutcome::LinkClosed)
    }

    /// The outcome if the delivery has already settled.
    pub fn try_outcome(&mut self) -> Option<SettlementOutcome> {
        if self.outcome.is_none() {
            self.outcome = match self.rx.try_recv() {
                Ok(outcome) => Some(outcome),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(SettlementOutcome::LinkClosed),
            };
        }
        self.outcome.clone()
    }

    /// Stop waiting for the settlement.
    pub fn cancel(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_resolved_outcome() {
        let (handle, resolver) = SettlementHandle::pair(DeliveryId::new(1));
        resolver.resolve(SettlementOutcome::Accepted);
        assert_eq!(handle.wait().await, SettlementOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_dropped_resolver_reads_as_link_closed() {
        let (handle, resolver) = SettlementHandle::pair(DeliveryId::new(1));
        drop(resolver);
        assert_eq!(handle.wait().await, SettlementOutcome::LinkClosed);
    }

    #[test]
    fn test_try_outcome_is_stable() {
        let (mut handle, resolver) = SettlementHandle::pair(DeliveryId::new(2));
        assert_eq!(handle.try_outcome(), None);

        resolver.resolve(SettlementOutcome::Released);
        assert_eq!(handle.try_outcome(), Some(SettlementOutcome::Released));
        assert_eq!(handle.try_outcome(), Some(SettlementOutcome::Released));
    }

    #[test]
    fn test_cancelled_handle_does_not_block_resolver() {
        let (handle, resolver) = SettlementHandle::pair(DeliveryId::new(3));
        handle.cancel();
        resolver.resolve(SettlementOutcome::Accepted);
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(SettlementOutcome::from(Outcome::None), SettlementOutcome::SettledUnconfirmed);
        assert_eq!(
            SettlementOutcome::from(Outcome::Rejected { error: None }),
            SettlementOutcome::Rejected(None)
        );
    }
}
