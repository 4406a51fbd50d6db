//! # Error Taxonomy
//!
//! A single closed error type shared by every public operation in the crate.
//! Categories mirror the failure modes a Tor control session can actually hit:
//! transport-level I/O, protocol violations, authentication/command rejection,
//! and the cooperative-cancellation/shutdown paths.

use std::io;

use thiserror::Error;

/// The cause recorded against a [`Error::Cancelled`] or [`Error::Interrupted`].
///
/// Kept as a plain string rather than a nested enum: cancellation causes
/// originate from caller-supplied predicates and shutdown reasons, which have
/// no closed vocabulary worth enumerating.
pub type Cause = String;

/// Everything that can go wrong while using a [`crate::session::Session`].
#[derive(Debug, Error)]
pub enum Error {
    /// A transport-level read, write, or connect failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The requested transport variant, or a parameter of it, is not usable
    /// on this platform (unsupported socket kind, path too long, invalid path).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The peer sent bytes that do not parse per control-spec, or a queue/parser
    /// invariant was violated. Always fatal to the session.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The authentication handshake completed but Tor rejected it.
    #[error("authentication failed: {status} {message}")]
    AuthFailed { status: u16, message: String },

    /// A specific command resolved with a non-2xx status.
    #[error("command failed: {status} {message}")]
    CommandFailed { status: u16, message: String },

    /// The caller cancelled the handle before it completed.
    #[error("cancelled: {0}")]
    Cancelled(Cause),

    /// The session was destroyed while the handle was still pending.
    #[error("interrupted: {0}")]
    Interrupted(Cause),

    /// A public method was called after the session reached `Destroyed`.
    #[error("session closed")]
    Closed,
}

impl Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::ProtocolError(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Clone-ish conversion used when the same failure must be delivered to
    /// more than one pending handle (e.g. every queued command on shutdown).
    /// `Error` does not derive `Clone` because `io::Error` does not; this
    /// reduces a terminal cause to a cause string instead.
    pub(crate) fn to_interrupted_cause(&self) -> Cause {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
