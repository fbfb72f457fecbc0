//! Delivery state and settlement modes.

use serde::{Deserialize, Serialize};

/// Error condition attached to a rejected delivery or a detach.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCondition {
    /// Symbolic condition, e.g. `amqp:not-allowed`.
    pub condition: String,
    /// Human-readable description.
    pub description: Option<String>,
}

impl ErrorCondition {
    /// Condition used when a peer breaks the link protocol.
    pub const NOT_ALLOWED: &'static str = "amqp:not-allowed";
    /// Condition used when a link is detached by the local endpoint.
    pub const DETACH_FORCED: &'static str = "amqp:link:detach-forced";

    /// Create a condition without description.
    pub fn new(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            description: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// `amqp:not-allowed` with the given description.
    pub fn not_allowed(description: impl Into<String>) -> Self {
        Self::new(Self::NOT_ALLOWED).with_description(description)
    }
}

impl core::fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.condition, description),
            None => f.write_str(&self.condition),
        }
    }
}

/// Delivery state carried by a disposition.
///
/// `None` means no outcome has been reached yet.
#[derive(Debug, Clone, PartialEq, Eq, Default, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    /// No outcome yet.
    #[default]
    None,
    /// The message was processed.
    Accepted,
    /// The message was invalid and will not be processed.
    Rejected {
        /// Why the message was rejected.
        error: Option<ErrorCondition>,
    },
    /// The message was not processed and may be redelivered.
    Released,
    /// The message was not processed and its annotations were changed.
    Modified {
        /// Count this attempt as a failed delivery.
        delivery_failed: bool,
        /// Do not redeliver to this link.
        undeliverable_here: bool,
    },
}

impl Outcome {
    /// Whether the state is one of the terminal outcomes.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Sender settlement mode requested at attach.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::FromRepr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SenderSettleMode {
    /// Deliveries are sent unsettled.
    Unsettled = 0,
    /// Deliveries are sent pre-settled.
    Settled = 1,
    /// The sender chooses per delivery.
    #[default]
    Mixed = 2,
}

/// Receiver settlement mode requested at attach.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::FromRepr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ReceiverSettleMode {
    /// The receiver settles spontaneously.
    #[default]
    First = 0,
    /// The receiver settles only after the sender has settled.
    Second = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_outcomes() {
        assert!(!Outcome::None.is_terminal());
        assert!(Outcome::Accepted.is_terminal());
        assert!(Outcome::Released.is_terminal());
        assert!(Outcome::Rejected { error: None }.is_terminal());
        assert_eq!(Outcome::Accepted.as_ref(), "accepted");
    }

    #[test]
    fn test_settle_mode_wire_values() {
        assert_eq!(SenderSettleMode::from_repr(1), Some(SenderSettleMode::Settled));
        assert_eq!(ReceiverSettleMode::from_repr(1), Some(ReceiverSettleMode::Second));
        assert_eq!(ReceiverSettleMode::from_repr(2), None);
    }

    #[test]
    fn test_error_condition_display() {
        let error = ErrorCondition::not_allowed("role mismatch");
        assert_eq!(error.to_string(), "amqp:not-allowed: role mismatch");
        assert_eq!(ErrorCondition::new("x:y").to_string(), "x:y");
    }
}
