//! Session output stream.

use tern_link::{FrameSink, LinkError, LinkResult};
use tern_proto::{Handle, LinkFrame, Performative};
use tokio::sync::mpsc;

/// Serialises frames from every link onto the one session output stream.
///
/// A single unbounded channel keeps each link's frames in the order the link
/// produced them; frames of different links interleave freely.
#[derive(Debug, Clone)]
pub struct SessionWriter {
    tx: mpsc::UnboundedSender<LinkFrame>,
}

impl SessionWriter {
    /// Create a writer feeding `tx`.
    pub fn new(tx: mpsc::UnboundedSender<LinkFrame>) -> Self {
        Self { tx }
    }

    /// Whether the transport has stopped reading.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl FrameSink for SessionWriter {
    fn enqueue(&self, handle: Handle, body: Performative) -> LinkResult<()> {
        self.tx
            .send(LinkFrame { handle, body })
            .map_err(|_| LinkError::TransportClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tern_proto::Flow;

    #[test]
    fn test_frames_keep_order_and_handle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = SessionWriter::new(tx);

        for credit in 1..=3 {
            let flow = Flow {
                link_credit: credit,
                ..Flow::default()
            };
            writer.enqueue(Handle::new(2), flow.into()).expect("open");
        }

        for credit in 1..=3 {
            let frame = rx.try_recv().expect("queued");
            assert_eq!(frame.handle, Handle::new(2));
            assert_matches!(frame.body, Performative::Flow(flow) if flow.link_credit == credit);
        }
    }

    #[test]
    fn test_closed_transport() {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = SessionWriter::new(tx);
        drop(rx);

        assert!(writer.is_closed());
        assert_matches!(
            writer.enqueue(Handle::new(0), Flow::default().into()),
            Err(LinkError::TransportClosed)
        );
    }
}
