//! Settlement and credit flow for AMQP 1.0 links.
//!
//! Each link tracks its own deliveries, enforces its own credit window and
//! decides how deliveries settle from the modes negotiated at attach. Links
//! emit frames through a [`FrameSink`] and never see frames addressed to other
//! links; routing between links is the session's job.
//!
//! # Components
//!
//! - [`DeliveryTracker`] - Per-link delivery state and settlement bookkeeping
//! - [`CreditController`] - Credit window and drain handling
//! - [`SettlementPolicy`] - Settlement decisions derived from the attach
//! - [`SenderLink`] / [`ReceiverLink`] - The application-facing link handles
//! - [`SettlementHandle`] - Completion of one sent delivery
//! - [`LinkArgs`] / [`LinkConfig`] - Credit and settlement configuration

mod args;
mod config;
mod constants;
mod credit;
mod error;
mod event;
mod handle;
mod link;
mod metrics;
mod policy;
mod sink;
mod tracker;

pub use args::{CreditPolicyArg, LinkArgs, ReceiverSettleModeArg, SenderSettleModeArg};
pub use config::{DefaultLinkConfig, LinkConfig};
pub use credit::{CreditController, CreditPolicy, FlowUpdate};
pub use error::{LinkError, LinkResult};
pub use event::LinkEvent;
pub use handle::{SettlementHandle, SettlementOutcome};
pub use link::{IncomingMessage, Link, MessageStream, ReceiverLink, SenderLink};
pub use policy::{SettlementMode, SettlementPolicy};
pub use sink::FrameSink;
pub use tracker::{Delivery, DeliveryTracker, DispositionReport, Recorded};
