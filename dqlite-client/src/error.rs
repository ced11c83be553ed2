//! Error types for dqlite client operations.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Result type for dqlite client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SQLite extended code a server returns when it is not the leader.
pub const ERR_IOERR_NOT_LEADER: u64 = 10 | (40 << 8);

/// SQLite extended code a server returns when it lost leadership mid-request.
pub const ERR_IOERR_LEADERSHIP_LOST: u64 = 10 | (41 << 8);

/// Errors that can occur while discovering the leader or talking to it.
#[derive(Debug, Error)]
pub enum Error {
    /// No candidate server reported itself as leader before retries ran out.
    #[error("no available dqlite leader server found")]
    NoAvailableLeader,

    /// The dial function could not reach the address.
    #[error("failed to establish network connection to {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Writing the protocol version failed.
    #[error("failed to send handshake: {0}")]
    Handshake(#[source] io::Error),

    /// Writing a request frame failed.
    #[error("send request (budget={budget:?}): {source}")]
    Send {
        budget: Option<Duration>,
        #[source]
        source: io::Error,
    },

    /// Reading a response frame failed.
    #[error("receive response (budget={budget:?}): {source}")]
    Receive {
        budget: Option<Duration>,
        #[source]
        source: io::Error,
    },

    /// An earlier call hit a connection-fatal error; the session is unusable.
    #[error("connection is broken: {reason}")]
    Broken { reason: String },

    /// The session was closed locally.
    #[error("connection is closed")]
    Closed,

    /// The server answered with a failure response.
    #[error("server failure ({code}): {description}")]
    Request { code: u64, description: String },

    /// The server answered with a response of the wrong type.
    #[error("unexpected response type {actual} (expected {expected})")]
    UnexpectedResponse { expected: u8, actual: u8 },

    /// A decoder tried to read past the end of the message body.
    #[error("short message: type={mtype} words={words} off={offset}")]
    ShortMessage { mtype: u8, words: u32, offset: usize },

    /// Any other malformed frame or value.
    #[error("protocol violation: {0}")]
    Malformed(String),

    /// The context was canceled.
    #[error("context canceled")]
    Canceled,

    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The node store failed.
    #[error("node store: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// Returns true when the error leaves the underlying connection unusable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Send { .. } | Error::Receive { .. } | Error::Broken { .. } | Error::Closed
        )
    }

    /// Returns true when the server says it is not (or no longer) the leader.
    pub fn is_not_leader(&self) -> bool {
        matches!(
            self,
            Error::Request { code, .. }
                if *code == ERR_IOERR_NOT_LEADER || *code == ERR_IOERR_LEADERSHIP_LOST
        )
    }

    /// Returns true when the peer hung up or reset the connection.
    ///
    /// Pre-1.0 servers drop the connection as soon as they see an unknown
    /// protocol version, which shows up here.
    pub(crate) fn is_disconnect(&self) -> bool {
        let source = match self {
            Error::Send { source, .. } | Error::Receive { source, .. } => source,
            _ => return false,
        };
        matches!(
            source.kind(),
            io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_not_leader_codes() {
        let err = Error::Request {
            code: ERR_IOERR_NOT_LEADER,
            description: "not leader".into(),
        };
        assert!(err.is_not_leader());
        assert!(!err.is_connection_fatal());

        let err = Error::Request {
            code: 1,
            description: "syntax error".into(),
        };
        assert!(!err.is_not_leader());
    }

    #[test]
    fn disconnects_are_detected_from_io_kinds() {
        let eof = Error::Receive {
            budget: None,
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
        };
        assert!(eof.is_disconnect());
        assert!(eof.is_connection_fatal());

        let timeout = Error::Receive {
            budget: None,
            source: io::Error::new(io::ErrorKind::TimedOut, "deadline"),
        };
        assert!(!timeout.is_disconnect());
        assert!(!Error::NoAvailableLeader.is_disconnect());
    }
}
