//! Outbound frame seam between links and the session.

use tern_proto::{Handle, Performative};

use crate::error::LinkResult;

/// Where links hand the frames they emit.
///
/// Implemented by the session router's writer, which serialises frames from
/// all links onto the one session output stream. Implementations must not
/// block: links call `enqueue` while holding their own state lock.
#[auto_impl::auto_impl(Arc, Box)]
pub trait FrameSink: Send + Sync + 'static {
    /// Queue `body` for transmission on the link `handle`.
    fn enqueue(&self, handle: Handle, body: Performative) -> LinkResult<()>;
}
