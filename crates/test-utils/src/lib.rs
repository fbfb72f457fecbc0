//! Test support for tern.
//!
//! - [`MockBroker`] - An in-memory queueing broker answering a session's frames
//! - [`Harness`] - A spawned session service wired to a broker
//! - [`wait_until`] / [`within_timeout`] - Bounded waits for async assertions

mod broker;
mod harness;

pub use broker::{DEFAULT_BROKER_CREDIT, MockBroker};
pub use harness::{Harness, WAIT_TIMEOUT, wait_until, within_timeout};
