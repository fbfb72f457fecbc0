//! CLI arguments for link settlement and credit configuration.

use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};
use tern_proto::{ReceiverSettleMode, SenderSettleMode};

use crate::config::LinkConfig;
use crate::constants::*;
use crate::credit::CreditPolicy;

/// CLI wrapper selecting a [`CreditPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreditPolicyArg {
    /// The application grants credit explicitly.
    Manual,
    /// Grant the credit quantum after every arrival (default).
    #[default]
    Replenish,
    /// Top up to the credit quantum once half of it is consumed.
    RefreshAtHalf,
}

/// CLI wrapper for [`SenderSettleMode`] with clap integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderSettleModeArg {
    /// Send deliveries unsettled (default).
    #[default]
    Unsettled,
    /// Pre-settle every delivery.
    Settled,
    /// Let the sender choose per delivery.
    Mixed,
}

impl From<SenderSettleModeArg> for SenderSettleMode {
    fn from(arg: SenderSettleModeArg) -> Self {
        match arg {
            SenderSettleModeArg::Unsettled => Self::Unsettled,
            SenderSettleModeArg::Settled => Self::Settled,
            SenderSettleModeArg::Mixed => Self::Mixed,
        }
    }
}

/// CLI wrapper for [`ReceiverSettleMode`] with clap integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverSettleModeArg {
    /// Settle on arrival (default).
    #[default]
    First,
    /// Settle when the application disposes of the message.
    Second,
}

impl From<ReceiverSettleModeArg> for ReceiverSettleMode {
    fn from(arg: ReceiverSettleModeArg) -> Self {
        match arg {
            ReceiverSettleModeArg::First => Self::First,
            ReceiverSettleModeArg::Second => Self::Second,
        }
    }
}

/// Link settlement and credit arguments.
#[derive(Debug, Args, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Link Settlement")]
#[serde(default)]
pub struct LinkArgs {
    /// How receivers replace consumed credit
    #[arg(long = "link.credit-policy", value_enum, default_value_t = CreditPolicyArg::Replenish)]
    pub credit_policy: CreditPolicyArg,

    /// Credit granted per arrival (replenish) or refresh window (refresh-at-half)
    #[arg(long = "link.credit-quantum", default_value_t = DEFAULT_CREDIT_QUANTUM)]
    pub credit_quantum: u32,

    /// Credit granted by receivers at attach
    #[arg(long = "link.initial-credit", default_value_t = DEFAULT_INITIAL_CREDIT)]
    pub initial_credit: u32,

    /// Seconds settled deliveries are retained to absorb late frames
    #[arg(long = "link.retention-secs", default_value_t = DEFAULT_RETENTION_SECS)]
    pub retention_secs: u64,

    /// Sender settle mode requested at attach
    #[arg(long = "link.snd-settle-mode", value_enum, default_value_t = SenderSettleModeArg::Unsettled)]
    pub snd_settle_mode: SenderSettleModeArg,

    /// Receiver settle mode requested at attach
    #[arg(long = "link.rcv-settle-mode", value_enum, default_value_t = ReceiverSettleModeArg::First)]
    pub rcv_settle_mode: ReceiverSettleModeArg,
}

impl Default for LinkArgs {
    fn default() -> Self {
        Self {
            credit_policy: CreditPolicyArg::default(),
            credit_quantum: DEFAULT_CREDIT_QUANTUM,
            initial_credit: DEFAULT_INITIAL_CREDIT,
            retention_secs: DEFAULT_RETENTION_SECS,
            snd_settle_mode: SenderSettleModeArg::default(),
            rcv_settle_mode: ReceiverSettleModeArg::default(),
        }
    }
}

impl LinkArgs {
    /// Load arguments from a TOML document. Missing keys take their defaults.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Validate argument combinations.
    ///
    /// Returns an error if arguments are set that don't apply to the selected policy.
    pub fn validate(&self) -> Result<(), String> {
        match self.credit_policy {
            CreditPolicyArg::Manual => {
                if self.credit_quantum != DEFAULT_CREDIT_QUANTUM {
                    return Err(
                        "credit-quantum has no effect when credit-policy is 'manual'".to_string()
                    );
                }
            }
            CreditPolicyArg::Replenish | CreditPolicyArg::RefreshAtHalf => {
                if self.credit_quantum == 0 {
                    return Err("credit-quantum must be positive".to_string());
                }
                if self.initial_credit == 0 {
                    return Err(
                        "initial-credit must be positive for automatic credit policies".to_string(),
                    );
                }
            }
        }
        Ok(())
    }
}

impl LinkConfig for LinkArgs {
    fn credit_policy(&self) -> CreditPolicy {
        match self.credit_policy {
            CreditPolicyArg::Manual => CreditPolicy::Manual,
            CreditPolicyArg::Replenish => CreditPolicy::Replenish {
                quantum: self.credit_quantum,
            },
            CreditPolicyArg::RefreshAtHalf => CreditPolicy::RefreshAtHalf {
                window: self.credit_quantum,
            },
        }
    }

    fn initial_credit(&self) -> u32 {
        self.initial_credit
    }

    fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    fn sender_settle_mode(&self) -> SenderSettleMode {
        self.snd_settle_mode.into()
    }

    fn receiver_settle_mode(&self) -> ReceiverSettleMode {
        self.rcv_settle_mode.into()
    }
}
