//! Session error types.

use tern_link::LinkError;
use tern_proto::Handle;

/// Errors that can occur while routing frames between links and the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No link is attached on the handle. The frame is dropped; other links are unaffected.
    #[error("no link attached on handle {0}")]
    UnknownLink(Handle),

    /// A link is already attached, or still detaching, on the handle.
    #[error("handle {0} is already in use")]
    HandleInUse(Handle),

    /// The remote broke the link protocol; the link has been detached.
    #[error("protocol violation on link {handle}: {reason}")]
    ProtocolViolation {
        /// The detached link.
        handle: Handle,
        /// What was violated.
        reason: String,
    },

    /// A link operation failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The session output stream is gone.
    #[error("session transport closed")]
    TransportClosed,

    /// Session arguments failed validation.
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for session operations.
pub type SessionResult<T> = core::result::Result<T, SessionError>;
