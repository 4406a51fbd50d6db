//! # Line Framer
//!
//! Splits an incoming byte stream into CRLF- (or bare-LF-) terminated lines,
//! enforcing a hard per-line size cap. Stateless aside from the read buffer;
//! writing is just "append `\r\n` and hand to the transport", done by the
//! caller directly.

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};

pub(crate) const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Accumulates bytes read from a [`crate::transport::Transport`] and yields
/// complete lines with their terminator stripped.
pub struct LineFramer {
    buf: BytesMut,
    max_line_bytes: usize,
}

impl LineFramer {
    pub fn new(max_line_bytes: usize) -> Self {
        LineFramer {
            buf: BytesMut::with_capacity(4096),
            max_line_bytes,
        }
    }

    pub fn with_default_cap() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }

    /// Appends freshly-read bytes to the internal buffer.
    pub fn ingest(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pulls the next complete line out of the buffer, if any. A line is
    /// terminated by `\n`, with an optional preceding `\r` stripped. Returns
    /// `Ok(None)` when no full line is buffered yet (caller should read more).
    pub fn next_line(&mut self) -> Result<Option<String>> {
        let Some(newline_pos) = self.buf.iter().position(|&b| b == b'\n') else {
            if self.buf.len() > self.max_line_bytes {
                return Err(Error::protocol(format!(
                    "line exceeds {} byte cap with no terminator",
                    self.max_line_bytes
                )));
            }
            return Ok(None);
        };

        if newline_pos > self.max_line_bytes {
            return Err(Error::protocol(format!(
                "line exceeds {} byte cap",
                self.max_line_bytes
            )));
        }

        let mut line_bytes = self.buf.split_to(newline_pos + 1);
        line_bytes.truncate(line_bytes.len() - 1); // drop '\n'
        if line_bytes.last() == Some(&b'\r') {
            line_bytes.truncate(line_bytes.len() - 1); // drop trailing '\r'
        }

        let line = String::from_utf8(line_bytes.to_vec())
            .map_err(|e| Error::protocol(format!("non-utf8 line: {e}")))?;
        Ok(Some(line))
    }

    /// True once the caller has drained the buffer and observed end-of-stream
    /// with no remaining partial line — used to decide whether trailing bytes
    /// at EOF should be treated as a protocol error.
    pub fn has_pending_partial_line(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Encodes a command line for the wire: verb, space-joined arguments, CRLF.
/// Does not escape arguments; callers (command construction) are responsible
/// for quoting/escaping values that need it (e.g. `AUTHENTICATE "<pw>"`).
pub fn encode_command_line(verb: &str, args: &[String]) -> Vec<u8> {
    let mut line = String::from(verb);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line.push_str("\r\n");
    line.into_bytes()
}
