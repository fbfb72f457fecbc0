//! Settlement policy.
//!
//! A link's [`SettlementMode`] is fixed by the attach that created it. The
//! [`SettlementPolicy`] pairs that mode with the local role and answers the
//! per-delivery questions the link asks when it sends or receives.

use serde::{Deserialize, Serialize};
use tern_proto::{Attach, ReceiverSettleMode, Role, SenderSettleMode};

/// How deliveries on a link get settled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SettlementMode {
    /// The sender pre-settles every delivery; no disposition round-trip.
    Settled,
    /// The receiver settles on arrival; the sender waits for that disposition.
    UnsettledAuto,
    /// The receiver settles when the application disposes of the message.
    UnsettledManual,
}

impl SettlementMode {
    /// Resolve the mode from the settle modes agreed at attach.
    ///
    /// `mixed` is treated as `unsettled`: deliveries are never pre-settled
    /// individually.
    pub const fn negotiate(snd: SenderSettleMode, rcv: ReceiverSettleMode) -> Self {
        match (snd, rcv) {
            (SenderSettleMode::Settled, _) => Self::Settled,
            (_, ReceiverSettleMode::Second) => Self::UnsettledManual,
            (_, ReceiverSettleMode::First) => Self::UnsettledAuto,
        }
    }

    /// Mode of a completed attach.
    pub const fn from_attach(attach: &Attach) -> Self {
        Self::negotiate(attach.snd_settle_mode, attach.rcv_settle_mode)
    }
}

/// Settlement decisions for one link. Stateless and cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPolicy {
    mode: SettlementMode,
    role: Role,
}

impl SettlementPolicy {
    /// Create the policy for a link.
    pub const fn new(mode: SettlementMode, role: Role) -> Self {
        Self { mode, role }
    }

    /// The negotiated mode.
    pub const fn mode(&self) -> SettlementMode {
        self.mode
    }

    /// The local role.
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Whether an arriving transfer must be answered with a disposition immediately.
    pub const fn auto_dispose_on_transfer(&self) -> bool {
        matches!(self.role, Role::Receiver) && matches!(self.mode, SettlementMode::UnsettledAuto)
    }

    /// Whether outgoing transfers are marked pre-settled.
    pub const fn presettle_outgoing(&self) -> bool {
        matches!(self.mode, SettlementMode::Settled)
    }

    /// Whether the application drives settlement itself.
    pub const fn allows_manual_disposition(&self) -> bool {
        matches!(self.role, Role::Receiver) && matches!(self.mode, SettlementMode::UnsettledManual)
    }

    /// Whether local settlement is announced with a disposition frame.
    pub const fn emits_dispositions(&self) -> bool {
        !matches!(self.mode, SettlementMode::Settled)
    }
}
