//! Incoming message stream of a receiver link.

use core::pin::Pin;
use core::task::{Context, Poll};

use bytes::Bytes;
use tern_proto::{DeliveryId, DeliveryTag, Handle};
use tokio::sync::mpsc;

/// A message delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// The receiver link it arrived on.
    pub handle: Handle,
    /// Delivery id to pass to `accept` / `reject` / `release`.
    pub delivery_id: DeliveryId,
    /// Sender-chosen tag.
    pub delivery_tag: DeliveryTag,
    /// Whether the delivery was already settled when the application saw it.
    pub settled: bool,
    /// Encoded message.
    pub payload: Bytes,
}

/// Messages arriving on a receiver link, one per distinct transfer.
///
/// Ends when the link is detached.
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<IncomingMessage>,
}

impl MessageStream {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<IncomingMessage>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next message. `None` once the link is detached and drained.
    pub async fn recv(&mut self) -> Option<IncomingMessage> {
        self.rx.recv().await
    }

    /// The next message if one is buffered.
    pub fn try_recv(&mut self) -> Option<IncomingMessage> {
        self.rx.try_recv().ok()
    }
}

impl futures::Stream for MessageStream {
    type Item = IncomingMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
