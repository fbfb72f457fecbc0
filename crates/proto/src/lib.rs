//! AMQP 1.0 link-level primitives.
//!
//! Decoded shapes of the performatives the settlement engine consumes and
//! produces. Byte-level encoding belongs to the transport; this crate only
//! carries the fields the engine reads.
//!
//! # Components
//!
//! - [`Handle`], [`DeliveryId`], [`DeliveryTag`] - Link and delivery identifiers
//! - [`Role`] - Which end of a link a frame or delivery belongs to
//! - [`Outcome`] - Delivery state carried by dispositions
//! - [`SenderSettleMode`] / [`ReceiverSettleMode`] - Settlement modes negotiated at attach
//! - [`LinkFrame`] / [`Performative`] - Handle-tagged frames exchanged with the transport

mod frame;
mod state;
mod types;

pub use frame::{Attach, Detach, Disposition, Flow, LinkFrame, Performative, Transfer};
pub use state::{ErrorCondition, Outcome, ReceiverSettleMode, SenderSettleMode};
pub use types::{DeliveryId, DeliveryTag, Handle, Role};
