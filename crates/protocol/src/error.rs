use std::fmt;

use tokio_tungstenite::tungstenite;

/// Which side of a connection a deadline guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    Read,
    Write,
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deadline::Read => f.write_str("read"),
            Deadline::Write => f.write_str("write"),
        }
    }
}

/// Errors produced by the relay wire layer.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("protocol error: {0}")]
    Protocol(#[source] tungstenite::Error),

    #[error("stream ended")]
    Eof,

    #[error("{0} deadline exceeded")]
    Timeout(Deadline),

    #[error("remote side closed the connection")]
    PeerClosed,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("write to {recipient} failed: {source}")]
    WriteFailure {
        recipient: String,
        #[source]
        source: Box<RelayError>,
    },

    #[error("connection closed")]
    Closed,
}

impl From<tungstenite::Error> for RelayError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed => RelayError::Eof,
            tungstenite::Error::AlreadyClosed => RelayError::Closed,
            other => RelayError::Protocol(other),
        }
    }
}

impl RelayError {
    /// Wraps a delivery error with the identity it was meant for.
    pub fn write_failure(recipient: impl Into<String>, source: RelayError) -> Self {
        RelayError::WriteFailure {
            recipient: recipient.into(),
            source: Box::new(source),
        }
    }

    /// Returns `true` for deadline expiry on either side.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RelayError::Timeout(_))
    }
}

/// Why a connection ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer sent a close frame.
    PeerClosed,
    /// No liveness frame arrived within the read window.
    Timeout,
    /// Closed on this side (replacement, shutdown, or explicit close).
    Local,
    /// Read or write failure.
    Error(RelayError),
}

impl From<RelayError> for CloseReason {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::PeerClosed => CloseReason::PeerClosed,
            RelayError::Timeout(Deadline::Read) => CloseReason::Timeout,
            RelayError::Closed => CloseReason::Local,
            other => CloseReason::Error(other),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::Timeout => f.write_str("read timeout"),
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::Error(e) => write!(f, "{e}"),
        }
    }
}
