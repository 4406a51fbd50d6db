use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use super::{Transport, TransportReader, TransportWriter};
use crate::error::Result;
use async_trait::async_trait;

/// A control connection over a Unix domain socket, the common case on
/// systems where Tor's `ControlSocket` is enabled instead of (or alongside)
/// `ControlPort`.
///
/// The client side never owns the socket file — Tor creates and removes it —
/// so unlike a server transport there is no cleanup-on-drop to perform here.
pub struct UnixSocketTransport {
    stream: UnixStream,
    path: String,
}

impl UnixSocketTransport {
    pub(crate) async fn connect(path: &str) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(UnixSocketTransport {
            stream,
            path: path.to_string(),
        })
    }
}

#[async_trait]
impl Transport for UnixSocketTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.stream.read(buf).await?;
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    fn name(&self) -> String {
        self.path.clone()
    }

    fn into_split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let (read_half, write_half) = self.stream.into_split();
        (
            Box::new(UnixReadHalf(read_half)),
            Box::new(UnixWriteHalf(write_half)),
        )
    }
}

struct UnixReadHalf(OwnedReadHalf);

#[async_trait]
impl TransportReader for UnixReadHalf {
    async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.0.read(buf).await?)
    }
}

struct UnixWriteHalf(OwnedWriteHalf);

#[async_trait]
impl TransportWriter for UnixWriteHalf {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.0.write_all(bytes).await?;
        self.0.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.0.shutdown().await;
        Ok(())
    }
}
