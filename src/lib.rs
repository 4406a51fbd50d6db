//! # torctl
//!
//! An async client library for the Tor control protocol (control-spec):
//! connect over TCP or a Unix domain socket, authenticate (NULL, COOKIE,
//! SAFECOOKIE, or PASSWORD), issue commands, and subscribe to asynchronous
//! `6xx` events — all driven by a pair of background tasks owned by a
//! [`session::Session`].
//!
//! ```text
//! Transport -> Line Framer -> Reply Parser -> Command Queue / Event Router -> Session Controller
//! ```
//!
//! Callers on an async runtime drive [`queue::CommandHandle`] directly with
//! `.await_result().await`; callers without one can use [`blocking::await_handle`]
//! from a background thread instead.

pub mod auth;
pub mod blocking;
pub mod error;
pub mod events;
pub mod framer;
pub mod logging;
pub mod proto;
pub mod queue;
pub mod session;
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use error::{Cause, Error, Result};
pub use events::SubscriptionId;
pub use proto::{EventKind, Reply, ReplyGroup};
pub use queue::{Command, CommandHandle, CommandState};
pub use session::{Session, SessionConfig, SessionState};
pub use transport::Endpoint;

/// The current version of this library, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
