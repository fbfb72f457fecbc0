//! In-memory broker peer.
//!
//! Plays the remote end of a session: reads the frames our links emit, keeps
//! one queue per address and answers with the transfers, dispositions and
//! flows a queueing broker would send.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tern_proto::{
    Attach, DeliveryId, DeliveryTag, Detach, Disposition, Flow, Handle, LinkFrame, Outcome,
    Performative, ReceiverSettleMode, Role, SenderSettleMode, Transfer,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

/// Credit the broker grants each sender link.
pub const DEFAULT_BROKER_CREDIT: u32 = 100;

/// Broker end of one of our links.
#[derive(Debug)]
enum PeerLink {
    /// Our sender publishes into `address`.
    Publisher {
        address: String,
        rcv_settle_mode: ReceiverSettleMode,
        delivery_count: u32,
        /// Accepted but waiting for our settling disposition.
        unsettled: BTreeMap<DeliveryId, Bytes>,
    },
    /// Our receiver consumes from `address`.
    Consumer {
        address: String,
        presettle: bool,
        next_id: u32,
        delivery_count: u32,
        credit: u32,
        /// Sent and not yet settled by our receiver.
        acquired: BTreeMap<DeliveryId, Bytes>,
    },
}

#[derive(Debug)]
struct BrokerState {
    credit: u32,
    queues: HashMap<String, VecDeque<Bytes>>,
    links: HashMap<Handle, PeerLink>,
    /// Every frame received from the session, in order.
    received: Vec<LinkFrame>,
}

/// A queueing broker driven by the session's outgoing frames.
#[derive(Debug, Clone)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
    inbound: mpsc::UnboundedSender<LinkFrame>,
}

impl MockBroker {
    /// Create a broker answering into `inbound`.
    pub fn new(inbound: mpsc::UnboundedSender<LinkFrame>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                credit: DEFAULT_BROKER_CREDIT,
                queues: HashMap::new(),
                links: HashMap::new(),
                received: Vec::new(),
            })),
            inbound,
        }
    }

    /// Set the credit granted to sender links attached from now on.
    pub fn with_credit(self, credit: u32) -> Self {
        self.state.lock().credit = credit;
        self
    }

    /// Process `outgoing` frames on a background task until the session closes.
    pub fn spawn(&self, outgoing: mpsc::UnboundedReceiver<LinkFrame>) -> JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move {
            let mut frames = UnboundedReceiverStream::new(outgoing);
            while let Some(frame) = frames.next().await {
                broker.handle_frame(frame);
            }
            debug!("Broker stopped");
        })
    }

    /// Register the broker side of a link attached on `address`.
    ///
    /// Our sender links are granted credit right away, so attach them in the
    /// router first. Register our receiver links here first, so their initial
    /// flow finds the consumer.
    pub fn attach(&self, attach: &Attach, address: &str) {
        let mut state = self.state.lock();
        let link = match attach.role {
            Role::Sender => PeerLink::Publisher {
                address: address.to_string(),
                rcv_settle_mode: attach.rcv_settle_mode,
                delivery_count: attach.initial_delivery_count,
                unsettled: BTreeMap::new(),
            },
            Role::Receiver => PeerLink::Consumer {
                address: address.to_string(),
                presettle: attach.snd_settle_mode == SenderSettleMode::Settled,
                next_id: 0,
                delivery_count: attach.initial_delivery_count,
                credit: 0,
                acquired: BTreeMap::new(),
            },
        };
        state.queues.entry(address.to_string()).or_default();

        if matches!(link, PeerLink::Publisher { .. }) {
            let flow = Flow {
                delivery_count: attach.initial_delivery_count,
                link_credit: state.credit,
                ..Flow::default()
            };
            self.send(attach.handle, flow);
        }
        state.links.insert(attach.handle, link);
    }

    /// Put a message on `address` as if another client had published it.
    pub fn publish(&self, address: &str, payload: impl Into<Bytes>) {
        let mut state = self.state.lock();
        state
            .queues
            .entry(address.to_string())
            .or_default()
            .push_back(payload.into());
        self.pump(&mut state);
    }

    /// Messages on `address` not yet consumed: queued plus sent-but-unsettled.
    pub fn queue_depth(&self, address: &str) -> usize {
        let state = self.state.lock();
        let queued = state.queues.get(address).map_or(0, VecDeque::len);
        let acquired: usize = state
            .links
            .values()
            .filter_map(|link| match link {
                PeerLink::Consumer {
                    address: linked,
                    acquired,
                    ..
                } if linked == address => Some(acquired.len()),
                _ => None,
            })
            .sum();
        queued + acquired
    }

    /// Every frame received from the session so far.
    pub fn received(&self) -> Vec<LinkFrame> {
        self.state.lock().received.clone()
    }

    /// Dispositions received from the session so far.
    pub fn dispositions(&self) -> Vec<Disposition> {
        self.state
            .lock()
            .received
            .iter()
            .filter_map(|frame| match &frame.body {
                Performative::Disposition(disposition) => Some(disposition.clone()),
                _ => None,
            })
            .collect()
    }

    /// Send a raw frame to the session.
    pub fn inject(&self, frame: LinkFrame) {
        let _ = self.inbound.send(frame);
    }

    fn send(&self, handle: Handle, body: impl Into<Performative>) {
        self.inject(LinkFrame::new(handle, body));
    }

    fn handle_frame(&self, frame: LinkFrame) {
        trace!(handle = %frame.handle, frame = frame.body.as_ref(), "Broker received frame");
        let mut state = self.state.lock();
        state.received.push(frame.clone());

        let LinkFrame { handle, body } = frame;
        match body {
            Performative::Transfer(transfer) => self.on_transfer(&mut state, handle, transfer),
            Performative::Flow(flow) => self.on_flow(&mut state, handle, flow),
            Performative::Disposition(disposition) => {
                self.on_disposition(&mut state, handle, &disposition)
            }
            Performative::Detach(detach) => self.on_detach(&mut state, handle, detach),
            Performative::Attach(_) => {}
        }
    }

    fn on_transfer(&self, state: &mut BrokerState, handle: Handle, transfer: Transfer) {
        let credit = state.credit;
        let Some(PeerLink::Publisher {
            address,
            rcv_settle_mode,
            delivery_count,
            unsettled,
        }) = state.links.get_mut(&handle)
        else {
            return;
        };
        *delivery_count = delivery_count.wrapping_add(1);
        let address = address.clone();

        if !transfer.settled {
            match rcv_settle_mode {
                ReceiverSettleMode::First => self.send(
                    handle,
                    Disposition::single(Role::Receiver, transfer.delivery_id, true, Outcome::Accepted),
                ),
                ReceiverSettleMode::Second => {
                    unsettled.insert(transfer.delivery_id, transfer.payload.clone());
                    self.send(
                        handle,
                        Disposition::single(
                            Role::Receiver,
                            transfer.delivery_id,
                            false,
                            Outcome::Accepted,
                        ),
                    );
                }
            }
        }
        let flow = Flow {
            delivery_count: *delivery_count,
            link_credit: credit,
            ..Flow::default()
        };
        self.send(handle, flow);

        state
            .queues
            .entry(address)
            .or_default()
            .push_back(transfer.payload);
        self.pump(state);
    }

    fn on_flow(&self, state: &mut BrokerState, handle: Handle, flow: Flow) {
        let Some(PeerLink::Consumer {
            delivery_count,
            credit,
            ..
        }) = state.links.get_mut(&handle)
        else {
            return;
        };
        let limit = flow.delivery_count.wrapping_add(flow.link_credit);
        let remaining = limit.wrapping_sub(*delivery_count);
        *credit = if remaining < (1 << 31) { remaining } else { 0 };
        self.pump(state);

        if !flow.drain {
            return;
        }
        if let Some(PeerLink::Consumer {
            delivery_count,
            credit,
            ..
        }) = state.links.get_mut(&handle)
        {
            *delivery_count = delivery_count.wrapping_add(*credit);
            *credit = 0;
            let reply = Flow {
                delivery_count: *delivery_count,
                link_credit: 0,
                drain: true,
                echo: false,
            };
            self.send(handle, reply);
        }
    }

    fn on_disposition(&self, state: &mut BrokerState, handle: Handle, disposition: &Disposition) {
        let last = disposition.last_or_first();
        let mut requeue = Vec::new();
        let address = match state.links.get_mut(&handle) {
            Some(PeerLink::Publisher { unsettled, .. }) => {
                unsettled.retain(|id, _| !in_range(*id, disposition.first, last));
                return;
            }
            Some(PeerLink::Consumer {
                address, acquired, ..
            }) => {
                if !disposition.settled {
                    return;
                }
                let ids: Vec<_> = acquired
                    .keys()
                    .copied()
                    .filter(|id| in_range(*id, disposition.first, last))
                    .collect();
                for id in ids {
                    let Some(payload) = acquired.remove(&id) else {
                        continue;
                    };
                    if matches!(
                        disposition.state,
                        Outcome::Released | Outcome::Modified { .. }
                    ) {
                        requeue.push(payload);
                    }
                }
                address.clone()
            }
            None => return,
        };

        let queue = state.queues.entry(address).or_default();
        for payload in requeue.into_iter().rev() {
            queue.push_front(payload);
        }
        self.pump(state);
    }

    fn on_detach(&self, state: &mut BrokerState, handle: Handle, detach: Detach) {
        if let Some(PeerLink::Consumer {
            address, acquired, ..
        }) = state.links.remove(&handle)
        {
            let queue = state.queues.entry(address).or_default();
            for payload in acquired.into_values().rev() {
                queue.push_front(payload);
            }
        }
        self.send(
            handle,
            Detach {
                closed: detach.closed,
                error: None,
            },
        );
    }

    /// Hand queued messages to consumers with credit.
    fn pump(&self, state: &mut BrokerState) {
        let BrokerState { queues, links, .. } = state;
        let mut handles: Vec<_> = links.keys().copied().collect();
        handles.sort_unstable();

        for handle in handles {
            let Some(PeerLink::Consumer {
                address,
                presettle,
                next_id,
                delivery_count,
                credit,
                acquired,
            }) = links.get_mut(&handle)
            else {
                continue;
            };
            let Some(queue) = queues.get_mut(address.as_str()) else {
                continue;
            };

            while *credit > 0 {
                let Some(payload) = queue.pop_front() else {
                    break;
                };
                let delivery_id = DeliveryId::new(*next_id);
                *next_id = next_id.wrapping_add(1);
                *delivery_count = delivery_count.wrapping_add(1);
                *credit -= 1;
                if !*presettle {
                    acquired.insert(delivery_id, payload.clone());
                }

                let transfer = Transfer {
                    delivery_id,
                    delivery_tag: DeliveryTag::from_id(delivery_id),
                    settled: *presettle,
                    payload,
                };
                self.send(handle, transfer);
            }
        }
    }
}

/// Whether `id` is in the inclusive range `first..=last`, which may wrap.
fn in_range(id: DeliveryId, first: DeliveryId, last: DeliveryId) -> bool {
    if first <= last {
        first <= id && id <= last
    } else {
        id >= first || id <= last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach(handle: u32, role: Role) -> Attach {
        Attach {
            name: "queue".to_string(),
            handle: Handle::new(handle),
            role,
            snd_settle_mode: SenderSettleMode::Unsettled,
            rcv_settle_mode: ReceiverSettleMode::First,
            initial_delivery_count: 0,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<LinkFrame>) -> Vec<LinkFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_publisher_gets_credit_on_attach() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = MockBroker::new(tx).with_credit(7);
        broker.attach(&attach(0, Role::Sender), "queue");

        let frames = drain(&mut rx);
        assert!(matches!(
            frames.as_slice(),
            [LinkFrame { body: Performative::Flow(Flow { link_credit: 7, .. }), .. }]
        ));
    }

    #[test]
    fn test_consumer_settlement_empties_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = MockBroker::new(tx);
        broker.attach(&attach(1, Role::Receiver), "queue");
        broker.publish("queue", "one");
        broker.publish("queue", "two");
        assert_eq!(broker.queue_depth("queue"), 2);

        broker.handle_frame(LinkFrame::new(
            Handle::new(1),
            Flow {
                delivery_count: 0,
                link_credit: 1,
                ..Flow::default()
            },
        ));
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(broker.queue_depth("queue"), 2);

        broker.handle_frame(LinkFrame::new(
            Handle::new(1),
            Disposition::single(Role::Receiver, DeliveryId::new(0), true, Outcome::Accepted),
        ));
        assert_eq!(broker.queue_depth("queue"), 1);
    }

    #[test]
    fn test_released_message_is_requeued() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let broker = MockBroker::new(tx);
        broker.attach(&attach(1, Role::Receiver), "queue");
        broker.publish("queue", "one");
        broker.handle_frame(LinkFrame::new(
            Handle::new(1),
            Flow {
                delivery_count: 0,
                link_credit: 1,
                ..Flow::default()
            },
        ));

        broker.handle_frame(LinkFrame::new(
            Handle::new(1),
            Disposition::single(Role::Receiver, DeliveryId::new(0), true, Outcome::Released),
        ));
        assert_eq!(broker.queue_depth("queue"), 1);
    }

    #[test]
    fn test_wrapped_range() {
        let max = DeliveryId::new(u32::MAX);
        assert!(in_range(max, DeliveryId::new(u32::MAX - 1), DeliveryId::new(1)));
        assert!(in_range(DeliveryId::new(0), max, DeliveryId::new(1)));
        assert!(!in_range(DeliveryId::new(5), max, DeliveryId::new(1)));
    }
}
