//! A running session wired to a [`MockBroker`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tern_link::{LinkConfig, MessageStream, ReceiverLink, SenderLink};
use tern_proto::{Handle, Role};
use tern_session::{SessionArgs, SessionRouter, create_session};
use tokio::task::JoinHandle;

use crate::broker::{DEFAULT_BROKER_CREDIT, MockBroker};

/// How long [`wait_until`] polls before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Session service, router and broker running on the current runtime.
#[derive(Debug)]
pub struct Harness {
    /// The session's router.
    pub router: Arc<SessionRouter>,
    /// The remote peer.
    pub broker: MockBroker,
    service: JoinHandle<()>,
    broker_task: JoinHandle<()>,
    next_handle: AtomicU32,
}

impl Harness {
    /// Start a session against a broker granting the default credit.
    pub fn start() -> Self {
        Self::with_broker_credit(DEFAULT_BROKER_CREDIT)
    }

    /// Start a session against a broker granting `credit` to each sender link.
    pub fn with_broker_credit(credit: u32) -> Self {
        tern_observability::init_test_logging();

        let (service, router, transport) = create_session(&SessionArgs::default())
            .unwrap_or_else(|err| panic!("create session: {err}"));
        let broker = MockBroker::new(transport.inbound).with_credit(credit);
        let broker_task = broker.spawn(transport.outgoing);
        let service = tokio::spawn(service.into_task());

        Self {
            router,
            broker,
            service,
            broker_task,
            next_handle: AtomicU32::new(0),
        }
    }

    fn next_handle(&self) -> Handle {
        Handle::new(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Attach a sender to `address` and wait for the broker's credit.
    pub async fn open_sender(&self, address: &str, config: impl LinkConfig) -> SenderLink {
        let attach = config.attach(address, self.next_handle(), Role::Sender);
        let link = self
            .router
            .attach_sender(&attach, config)
            .unwrap_or_else(|err| panic!("attach sender: {err}"));
        self.broker.attach(&attach, address);

        wait_until("sender credit", || link.credit() > 0).await;
        link
    }

    /// Attach a receiver to `address`. Its initial credit is granted at once.
    pub fn open_receiver(
        &self,
        address: &str,
        config: impl LinkConfig,
    ) -> (ReceiverLink, MessageStream) {
        let attach = config.attach(address, self.next_handle(), Role::Receiver);
        self.broker.attach(&attach, address);
        self.router
            .attach_receiver(&attach, config)
            .unwrap_or_else(|err| panic!("attach receiver: {err}"))
    }

    /// Stop the broker and wait for the session service to wind down.
    pub async fn shutdown(self) {
        let Self {
            broker,
            service,
            broker_task,
            ..
        } = self;
        broker_task.abort();
        let _ = broker_task.await;
        drop(broker);

        if let Err(err) = service.await {
            panic!("session service failed: {err}");
        }
    }
}

/// Poll `condition` until it holds.
///
/// # Panics
///
/// If it does not hold within [`WAIT_TIMEOUT`].
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    if tokio::time::timeout(WAIT_TIMEOUT, poll).await.is_err() {
        panic!("timed out waiting for {what}");
    }
}

/// Await `future`, panicking if it takes longer than [`WAIT_TIMEOUT`].
pub async fn within_timeout<F: Future>(what: &str, future: F) -> F::Output {
    match tokio::time::timeout(WAIT_TIMEOUT, future).await {
        Ok(output) => output,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}
