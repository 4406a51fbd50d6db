//! Wire-level reply types: [`Reply`], [`ReplyGroup`], and [`EventKind`].

use std::fmt;

/// A single status-tagged message: one or more wire lines sharing a status code.
///
/// For a single-line reply, `message` is the text after the separator and
/// `body` is empty. For a `+`-introduced block, `message` is the text on the
/// opening line (after the `+`) and `body` holds the dot-stuffed payload with
/// the trailing `.` line removed and embedded newlines joining each line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub message: String,
    pub body: Option<String>,
}

impl Reply {
    pub(crate) fn single(status: u16, message: String) -> Self {
        Reply {
            status,
            message,
            body: None,
        }
    }

    pub(crate) fn with_body(status: u16, message: String, body: String) -> Self {
        Reply {
            status,
            message,
            body: Some(body),
        }
    }

    /// Status class: `2` for `2xx`, `6` for `6xx`, etc.
    pub fn status_class(&self) -> u16 {
        self.status / 100
    }
}

/// An ordered, non-empty sequence of [`Reply`] sharing a single logical response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyGroup {
    pub replies: Vec<Reply>,
}

impl ReplyGroup {
    pub(crate) fn new(replies: Vec<Reply>) -> Self {
        debug_assert!(!replies.is_empty());
        ReplyGroup { replies }
    }

    /// Status of the first reply in the group; this is what classifies the
    /// group as synchronous success/failure or asynchronous event.
    pub fn status(&self) -> u16 {
        self.replies[0].status
    }

    pub fn is_event(&self) -> bool {
        self.status() / 100 == 6
    }

    pub fn is_success(&self) -> bool {
        self.status() / 100 == 2
    }

    /// First reply's message text, used by the parser/router to pull the
    /// event-kind token off an asynchronous group.
    pub fn first_message(&self) -> &str {
        &self.replies[0].message
    }

    /// Concatenates every reply's message with `\n`, used for multi-reply
    /// synchronous groups where callers want the full text.
    pub fn joined_messages(&self) -> String {
        self.replies
            .iter()
            .map(|r| r.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The closed set of asynchronous event tags defined by the Tor control
/// specification, plus an `Unknown` escape hatch for tags this crate does not
/// yet recognize (the protocol grows event kinds over time; an unrecognized
/// tag must never fail the parse).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Circ,
    Stream,
    OrConn,
    Bw,
    Debug,
    Info,
    Notice,
    Warn,
    Err,
    NewDesc,
    AddrMap,
    DescChanged,
    StatusGeneral,
    StatusClient,
    StatusServer,
    Guard,
    Ns,
    StreamBw,
    ClientsSeen,
    NewConsensus,
    BuildTimeoutSet,
    Signal,
    ConfChanged,
    CircMinor,
    TransportLaunched,
    ConnBw,
    CircBw,
    CellStats,
    HsDesc,
    HsDescContent,
    NetworkLiveness,
    Unknown(String),
}

impl EventKind {
    /// Whether Tor delivers this event's payload as a `+`/`.` dot-stuffed
    /// block rather than a single `650` line.
    pub fn is_multiline(&self) -> bool {
        matches!(
            self,
            EventKind::Ns | EventKind::NewConsensus | EventKind::HsDescContent
        )
    }

    /// The wire token Tor uses to identify this event kind (e.g. `"CIRC"`).
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Circ => "CIRC",
            EventKind::Stream => "STREAM",
            EventKind::OrConn => "ORCONN",
            EventKind::Bw => "BW",
            EventKind::Debug => "DEBUG",
            EventKind::Info => "INFO",
            EventKind::Notice => "NOTICE",
            EventKind::Warn => "WARN",
            EventKind::Err => "ERR",
            EventKind::NewDesc => "NEWDESC",
            EventKind::AddrMap => "ADDRMAP",
            EventKind::DescChanged => "DESCCHANGED",
            EventKind::StatusGeneral => "STATUS_GENERAL",
            EventKind::StatusClient => "STATUS_CLIENT",
            EventKind::StatusServer => "STATUS_SERVER",
            EventKind::Guard => "GUARD",
            EventKind::Ns => "NS",
            EventKind::StreamBw => "STREAM_BW",
            EventKind::ClientsSeen => "CLIENTS_SEEN",
            EventKind::NewConsensus => "NEWCONSENSUS",
            EventKind::BuildTimeoutSet => "BUILDTIMEOUT_SET",
            EventKind::Signal => "SIGNAL",
            EventKind::ConfChanged => "CONF_CHANGED",
            EventKind::CircMinor => "CIRC_MINOR",
            EventKind::TransportLaunched => "TRANSPORT_LAUNCHED",
            EventKind::ConnBw => "CONN_BW",
            EventKind::CircBw => "CIRC_BW",
            EventKind::CellStats => "CELL_STATS",
            EventKind::HsDesc => "HS_DESC",
            EventKind::HsDescContent => "HS_DESC_CONTENT",
            EventKind::NetworkLiveness => "NETWORK_LIVENESS",
            EventKind::Unknown(tag) => tag.as_str(),
        }
    }

    pub fn parse(token: &str) -> Self {
        match token {
            "CIRC" => EventKind::Circ,
            "STREAM" => EventKind::Stream,
            "ORCONN" => EventKind::OrConn,
            "BW" => EventKind::Bw,
            "DEBUG" => EventKind::Debug,
            "INFO" => EventKind::Info,
            "NOTICE" => EventKind::Notice,
            "WARN" => EventKind::Warn,
            "ERR" => EventKind::Err,
            "NEWDESC" => EventKind::NewDesc,
            "ADDRMAP" => EventKind::AddrMap,
            "DESCCHANGED" => EventKind::DescChanged,
            "STATUS_GENERAL" => EventKind::StatusGeneral,
            "STATUS_CLIENT" => EventKind::StatusClient,
            "STATUS_SERVER" => EventKind::StatusServer,
            "GUARD" => EventKind::Guard,
            "NS" => EventKind::Ns,
            "STREAM_BW" => EventKind::StreamBw,
            "CLIENTS_SEEN" => EventKind::ClientsSeen,
            "NEWCONSENSUS" => EventKind::NewConsensus,
            "BUILDTIMEOUT_SET" => EventKind::BuildTimeoutSet,
            "SIGNAL" => EventKind::Signal,
            "CONF_CHANGED" => EventKind::ConfChanged,
            "CIRC_MINOR" => EventKind::CircMinor,
            "TRANSPORT_LAUNCHED" => EventKind::TransportLaunched,
            "CONN_BW" => EventKind::ConnBw,
            "CIRC_BW" => EventKind::CircBw,
            "CELL_STATS" => EventKind::CellStats,
            "HS_DESC" => EventKind::HsDesc,
            "HS_DESC_CONTENT" => EventKind::HsDescContent,
            "NETWORK_LIVENESS" => EventKind::NetworkLiveness,
            other => EventKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
