//! # In-Process Test Harness
//!
//! An in-memory duplex [`Transport`] plus a scripted driver, so the session
//! core can be exercised end-to-end without a real `tor` binary. Mirrors the
//! teacher's in-process transport tests (`TcpSocketTransport`'s
//! `#[tokio::test]` suite talks to itself over loopback); here the two
//! session halves talk over an in-memory pipe instead of a socket.

use async_trait::async_trait;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use crate::error::Result;
use crate::framer::LineFramer;
use crate::transport::{Transport, TransportReader, TransportWriter};

const DEFAULT_DUPLEX_BUF: usize = 64 * 1024;

/// The session-facing end of an in-memory duplex pipe.
pub struct DuplexTransport {
    stream: DuplexStream,
}

impl DuplexTransport {
    /// Builds a connected pair: the [`DuplexTransport`] to hand to a
    /// [`crate::session::Session`], and a [`ScriptedDriver`] the test uses to
    /// play the other side of the conversation.
    pub fn pair() -> (DuplexTransport, ScriptedDriver) {
        let (a, b) = tokio::io::duplex(DEFAULT_DUPLEX_BUF);
        (
            DuplexTransport { stream: a },
            ScriptedDriver {
                stream: b,
                framer: LineFramer::with_default_cap(),
            },
        )
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream.read(buf).await?)
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    fn name(&self) -> String {
        "in-memory-duplex".to_string()
    }

    fn into_split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let (read_half, write_half) = split(self.stream);
        (
            Box::new(DuplexReadHalf(read_half)),
            Box::new(DuplexWriteHalf(write_half)),
        )
    }
}

struct DuplexReadHalf(ReadHalf<DuplexStream>);

#[async_trait]
impl TransportReader for DuplexReadHalf {
    async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.0.read(buf).await?)
    }
}

struct DuplexWriteHalf(WriteHalf<DuplexStream>);

#[async_trait]
impl TransportWriter for DuplexWriteHalf {
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

/// Plays the Tor side of a scripted conversation in a test: reads command
/// lines the session under test writes, and feeds back canned reply lines.
pub struct ScriptedDriver {
    stream: DuplexStream,
    framer: LineFramer,
}

impl ScriptedDriver {
    /// Reads the next full command line the session wrote (CRLF stripped).
    pub async fn read_line(&mut self) -> String {
        loop {
            if let Some(line) = self.framer.next_line().expect("test driver framing error") {
                return line;
            }
            let mut buf = [0u8; 4096];
            let n = self
                .stream
                .read(&mut buf)
                .await
                .expect("test driver read failed");
            assert!(n > 0, "session closed the transport before sending expected line");
            self.framer.ingest(&buf[..n]);
        }
    }

    /// Asserts the next command line equals `expected`.
    pub async fn expect_line(&mut self, expected: &str) {
        let line = self.read_line().await;
        assert_eq!(line, expected);
    }

    /// Writes one reply/event line, appending CRLF.
    pub async fn send_line(&mut self, line: &str) {
        self.stream.write_all(line.as_bytes()).await.unwrap();
        self.stream.write_all(b"\r\n").await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Writes several lines in sequence.
    pub async fn send_lines(&mut self, lines: &[&str]) {
        for line in lines {
            self.send_line(line).await;
        }
    }

    /// Writes raw bytes with no appended terminator, for exercising a
    /// dangling partial line at EOF.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Closes the driver's end, simulating Tor closing the connection.
    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
