//! # Transport Abstraction
//!
//! A polymorphic, protocol-agnostic bidirectional byte stream to a Tor
//! control listener. Mirrors the teacher's `IpcTransport` trait shape: an
//! async trait object, a config value, and a factory — generalized here to
//! the two endpoint kinds a Tor control connection actually uses.

mod tcp;
#[cfg(unix)]
mod unix;
#[cfg(not(unix))]
mod unix_stub;

pub use tcp::TcpTransport;
#[cfg(unix)]
pub use unix::UnixSocketTransport;
#[cfg(not(unix))]
pub use unix_stub::UnixSocketTransport;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Maximum filesystem-socket path length honored across platforms (the
/// historical `sockaddr_un` limit), independent of any single platform's
/// actual `sun_path` size.
pub const MAX_SOCKET_PATH_BYTES: usize = 105;

/// Socket buffer sizes to request on the underlying OS socket, sourced from
/// [`crate::session::SessionConfig`]. `None` leaves the platform default in
/// place. Only `TcpTransport` currently acts on this; a Unix domain socket
/// connection ignores it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketTuning {
    pub recv_buffer_bytes: Option<usize>,
    pub send_buffer_bytes: Option<usize>,
}

/// Where to reach a Tor control listener.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    UnixSocket { path: String },
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix_socket(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.contains('\n') {
            return Err(Error::unsupported(
                "unix socket path must not contain newlines",
            ));
        }
        if path.len() > MAX_SOCKET_PATH_BYTES {
            return Err(Error::unsupported(format!(
                "unix socket path longer than {MAX_SOCKET_PATH_BYTES} bytes"
            )));
        }
        Ok(Endpoint::UnixSocket { path })
    }
}

/// A bidirectional byte stream plus an idempotent close, with nothing
/// protocol-aware layered on top. Implementations are responsible for their
/// own internal partial-write handling; `write` either completes fully or
/// fails.
#[async_trait]
pub trait Transport: Send {
    /// Writes the full contents of `bytes`, or fails. The Session Controller
    /// guarantees this is never called concurrently with another `write`.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Reads whatever is available into `buf`, returning the number of bytes
    /// read, or `0` on a clean EOF.
    async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Idempotent close; subsequent reads observe EOF and writes fail.
    async fn close(&mut self) -> Result<()>;

    /// Human-readable identifier for logging (peer address or socket path).
    fn name(&self) -> String;

    /// Splits this transport into independently owned read/write halves so
    /// the Session Controller's reader and writer tasks can each hold one
    /// without contending on a shared lock. Every transport variant backs
    /// onto a type that natively supports this (`TcpStream`/`UnixStream`'s
    /// `into_split`, or an in-memory duplex pipe in tests).
    fn into_split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>);
}

/// The read half of a split [`Transport`].
#[async_trait]
pub trait TransportReader: Send {
    async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// The write half of a split [`Transport`].
#[async_trait]
pub trait TransportWriter: Send {
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Builds a [`Transport`] for a given [`Endpoint`], mirroring the teacher's
/// `TransportFactory` pattern.
pub struct TransportFactory;

impl TransportFactory {
    pub async fn connect(endpoint: &Endpoint, tuning: &SocketTuning) -> Result<Box<dyn Transport>> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let transport = TcpTransport::connect(host, *port, tuning).await?;
                Ok(Box::new(transport))
            }
            Endpoint::UnixSocket { path } => {
                let transport = UnixSocketTransport::connect(path).await?;
                Ok(Box::new(transport))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlong_unix_socket_path() {
        let long_path = "/tmp/".to_string() + &"x".repeat(MAX_SOCKET_PATH_BYTES);
        assert!(Endpoint::unix_socket(long_path).is_err());
    }

    #[test]
    fn rejects_unix_socket_path_with_newline() {
        assert!(Endpoint::unix_socket("/tmp/sock\n").is_err());
    }

    #[test]
    fn accepts_reasonable_unix_socket_path() {
        assert!(Endpoint::unix_socket("/run/tor/control.sock").is_ok());
    }
}
