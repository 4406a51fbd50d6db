use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use super::{SocketTuning, Transport, TransportReader, TransportWriter};
use crate::error::Result;
use async_trait::async_trait;

const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);

/// A control connection over loopback TCP, the common case when Tor's
/// `ControlPort` is bound to `127.0.0.1`.
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
}

impl TcpTransport {
    pub(crate) async fn connect(host: &str, port: u16, tuning: &SocketTuning) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;

        let sock_ref = SockRef::from(&stream);
        let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
        if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
            debug!("failed to set tcp keepalive on control connection: {e}");
        }
        if let Some(n) = tuning.recv_buffer_bytes {
            if let Err(e) = sock_ref.set_recv_buffer_size(n) {
                debug!("failed to set recv buffer size on control connection: {e}");
            }
        }
        if let Some(n) = tuning.send_buffer_bytes {
            if let Err(e) = sock_ref.set_send_buffer_size(n) {
                debug!("failed to set send buffer size on control connection: {e}");
            }
        }

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| format!("{host}:{port}"));

        Ok(TcpTransport { stream, peer })
    }
}

#[async_trait]
impl Transport for TcpTransport {
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
        self.peer.clone()
    }

    fn into_split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let (read_half, write_half) = self.stream.into_split();
        (
            Box::new(TcpReadHalf(read_half)),
            Box::new(TcpWriteHalf(write_half)),
        )
    }
}

struct TcpReadHalf(OwnedReadHalf);

#[async_trait]
impl TransportReader for TcpReadHalf {
    async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.0.read(buf).await?)
    }
}

struct TcpWriteHalf(OwnedWriteHalf);

#[async_trait]
impl TransportWriter for TcpWriteHalf {
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
