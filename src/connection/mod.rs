//! Connections handed to the messaging client
//!
//! This module handles:
//! - Guarded connections over admitted KCP and QUIC streams
//! - Plain connections over native TCP, TLS and UDP streams
//! - Deadlines and exactly-once close for both

mod deadline;
mod guarded;
mod plain;
mod split;

pub use deadline::Deadlines;
pub use guarded::GuardedConnection;
pub use plain::PlainConnection;

use crate::addr::CanonicalAddress;
use crate::error::TransportError;
use tokio::time::Instant;

/// A bidirectional connection of either kind
#[derive(Debug, Clone)]
pub enum Connection {
    Guarded(GuardedConnection),
    Plain(PlainConnection),
}

impl Connection {
    /// Read bytes; `Ok(0)` is end-of-stream
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self {
            Connection::Guarded(conn) => conn.read(buf).await,
            Connection::Plain(conn) => conn.read(buf).await,
        }
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        match self {
            Connection::Guarded(conn) => conn.write(buf).await,
            Connection::Plain(conn) => conn.write(buf).await,
        }
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        match self {
            Connection::Guarded(conn) => conn.close().await,
            Connection::Plain(conn) => conn.close().await,
        }
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError> {
        match self {
            Connection::Guarded(conn) => conn.set_read_deadline(deadline),
            Connection::Plain(conn) => conn.set_read_deadline(deadline),
        }
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError> {
        match self {
            Connection::Guarded(conn) => conn.set_write_deadline(deadline),
            Connection::Plain(conn) => conn.set_write_deadline(deadline),
        }
    }

    pub fn set_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError> {
        match self {
            Connection::Guarded(conn) => conn.set_deadline(deadline),
            Connection::Plain(conn) => conn.set_deadline(deadline),
        }
    }

    pub fn local_addr(&self) -> &CanonicalAddress {
        match self {
            Connection::Guarded(conn) => conn.local_addr(),
            Connection::Plain(conn) => conn.local_addr(),
        }
    }

    pub fn peer_addr(&self) -> &CanonicalAddress {
        match self {
            Connection::Guarded(conn) => conn.peer_addr(),
            Connection::Plain(conn) => conn.peer_addr(),
        }
    }

    /// The guarded form, when this connection went through admission
    pub fn as_guarded(&self) -> Option<&GuardedConnection> {
        match self {
            Connection::Guarded(conn) => Some(conn),
            Connection::Plain(_) => None,
        }
    }
}

impl From<GuardedConnection> for Connection {
    fn from(conn: GuardedConnection) -> Self {
        Connection::Guarded(conn)
    }
}

impl From<PlainConnection> for Connection {
    fn from(conn: PlainConnection) -> Self {
        Connection::Plain(conn)
    }
}
