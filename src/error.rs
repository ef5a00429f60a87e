//! Error type shared by dialers, listeners and connections

use std::fmt;
use std::io;
use thiserror::Error;

/// Errors surfaced by the transport adapter layer
///
/// End-of-stream is not an error here: reads report it as `Ok(0)`, whether the
/// peer sent a close frame or the underlying stream failed.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Admission handshake missing, wrong or too slow. The listener is fine.
    #[error("Connection from {peer} rejected: {reason}")]
    Rejected { peer: String, reason: String },

    /// A deadline had already passed when the operation was called
    #[error("{op} deadline exceeded")]
    Timeout { op: &'static str },

    /// Raw connect or admission token write failed
    #[error("Dial {address} failed: {source}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection is closed")]
    Closed,

    #[error("Listener is closed")]
    ListenerClosed,

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    pub fn rejected(peer: impl fmt::Display, reason: impl Into<String>) -> Self {
        TransportError::Rejected {
            peer: peer.to_string(),
            reason: reason.into(),
        }
    }

    pub fn dial(address: impl fmt::Display, source: io::Error) -> Self {
        TransportError::Dial {
            address: address.to_string(),
            source,
        }
    }

    pub fn tls(err: impl fmt::Display) -> Self {
        TransportError::Tls(err.to_string())
    }

    /// The caller should keep accepting; only this one peer was turned away
    pub fn is_temporary(&self) -> bool {
        matches!(self, TransportError::Rejected { .. })
    }

    /// The operation hit a deadline and may be retried with a fresh one
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Timeout { .. } => true,
            TransportError::Dial { source, .. } => source.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            TransportError::Io(inner) => inner.kind(),
            TransportError::Timeout { .. } => io::ErrorKind::TimedOut,
            TransportError::Rejected { .. } => io::ErrorKind::ConnectionRefused,
            TransportError::Dial { source, .. } => source.kind(),
            TransportError::Closed | TransportError::ListenerClosed => io::ErrorKind::NotConnected,
            TransportError::UnsupportedNetwork(_) => io::ErrorKind::Unsupported,
            TransportError::Tls(_) => io::ErrorKind::InvalidData,
        }
    }
}

impl From<TransportError> for io::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(inner) => inner,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}
