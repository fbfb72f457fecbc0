//! Link configuration.
//!
//! [`LinkConfig`] defines what a link needs at attach time. CLI args
//! ([`LinkArgs`](crate::LinkArgs)) implement it directly; [`DefaultLinkConfig`]
//! carries the built-in defaults.

use std::time::Duration;

use tern_proto::{Attach, Handle, ReceiverSettleMode, Role, SenderSettleMode};

use crate::constants::*;
use crate::credit::CreditPolicy;

/// Configuration consumed when a link is attached.
#[auto_impl::auto_impl(&, Arc)]
pub trait LinkConfig {
    /// How receivers replace consumed credit.
    fn credit_policy(&self) -> CreditPolicy;

    /// Credit a receiver grants at attach.
    fn initial_credit(&self) -> u32;

    /// How long settled deliveries are retained before pruning.
    fn retention(&self) -> Duration;

    /// Sender settle mode to request at attach.
    fn sender_settle_mode(&self) -> SenderSettleMode;

    /// Receiver settle mode to request at attach.
    fn receiver_settle_mode(&self) -> ReceiverSettleMode;

    /// The attach this configuration proposes for a new link.
    ///
    /// The link lifecycle collaborator sends it and hands back the attach
    /// completed with the peer's answer.
    fn attach(&self, name: &str, handle: Handle, role: Role) -> Attach {
        Attach {
            name: name.to_string(),
            handle,
            role,
            snd_settle_mode: self.sender_settle_mode(),
            rcv_settle_mode: self.receiver_settle_mode(),
            initial_delivery_count: 0,
        }
    }
}

/// Built-in link configuration.
///
/// Unsettled sends, receivers settling on arrival, 1-for-1 credit replenishment.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLinkConfig;

impl LinkConfig for DefaultLinkConfig {
    fn credit_policy(&self) -> CreditPolicy {
        CreditPolicy::default()
    }

    fn initial_credit(&self) -> u32 {
        DEFAULT_INITIAL_CREDIT
    }

    fn retention(&self) -> Duration {
        Duration::from_secs(DEFAULT_RETENTION_SECS)
    }

    fn sender_settle_mode(&self) -> SenderSettleMode {
        SenderSettleMode::Unsettled
    }

    fn receiver_settle_mode(&self) -> ReceiverSettleMode {
        ReceiverSettleMode::First
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SettlementMode;

    #[test]
    fn test_default_config_negotiates_auto_settlement() {
        let attach = DefaultLinkConfig.attach("queue", Handle::new(2), Role::Receiver);
        assert_eq!(attach.handle, Handle::new(2));
        assert_eq!(attach.name, "queue");
        assert_eq!(SettlementMode::from_attach(&attach), SettlementMode::UnsettledAuto);
    }

    #[test]
    fn test_default_credit() {
        assert_eq!(DefaultLinkConfig.initial_credit(), 100);
        assert_eq!(DefaultLinkConfig.credit_policy(), CreditPolicy::Replenish { quantum: 1 });
        assert_eq!(DefaultLinkConfig.retention(), Duration::from_secs(30));
    }
}
