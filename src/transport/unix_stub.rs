//! Non-Unix stand-in for [`super::unix::UnixSocketTransport`]:
//! `tokio::net::UnixStream` doesn't exist off Unix, so this variant fails at
//! construction with `Unsupported` instead of failing the build.

use async_trait::async_trait;

use super::{Transport, TransportReader, TransportWriter};
use crate::error::{Error, Result};

pub struct UnixSocketTransport {
    _unreachable: (),
}

impl UnixSocketTransport {
    pub(crate) async fn connect(_path: &str) -> Result<Self> {
        Err(Error::unsupported(
            "unix domain sockets are not supported on this platform",
        ))
    }
}

#[async_trait]
impl Transport for UnixSocketTransport {
    async fn write(&mut self, _bytes: &[u8]) -> Result<()> {
        unreachable!("connect() never succeeds, so no instance exists to call this")
    }

    async fn read_into(&mut self, _buf: &mut [u8]) -> Result<usize> {
        unreachable!("connect() never succeeds, so no instance exists to call this")
    }

    async fn close(&mut self) -> Result<()> {
        unreachable!("connect() never succeeds, so no instance exists to call this")
    }

    fn name(&self) -> String {
        unreachable!("connect() never succeeds, so no instance exists to call this")
    }

    fn into_split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        unreachable!("connect() never succeeds, so no instance exists to call this")
    }
}
