//! Connection over a native stream, without admission or control frames

use super::deadline::Deadlines;
use super::split::SplitStream;
use crate::addr::CanonicalAddress;
use crate::error::TransportError;
use crate::transport::{BoxedStream, TransportStream};
use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::time::Instant;

/// Native connection with deadlines enforced while operations block
#[derive(Clone)]
pub struct PlainConnection {
    shared: Arc<Shared>,
}

struct Shared {
    io: SplitStream<BoxedStream>,
    deadlines: Mutex<Deadlines>,
    closed: OnceCell<Option<io::ErrorKind>>,
    local: CanonicalAddress,
    peer: CanonicalAddress,
}

impl PlainConnection {
    pub fn new(stream: BoxedStream) -> Self {
        let local = CanonicalAddress::normalize(stream.local_addr());
        let peer = CanonicalAddress::normalize(stream.peer_addr());

        Self {
            shared: Arc::new(Shared {
                io: SplitStream::new(stream),
                deadlines: Mutex::new(Deadlines::default()),
                closed: OnceCell::new(),
                local,
                peer,
            }),
        }
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let deadline = self.shared.deadlines.lock().read;
        with_deadline(deadline, "read", self.shared.io.read(buf)).await
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let deadline = self.shared.deadlines.lock().write;
        with_deadline(deadline, "write", self.shared.io.write_all(buf)).await?;
        Ok(buf.len())
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.shared.deadlines.lock().read = deadline;
        Ok(())
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.shared.deadlines.lock().write = deadline;
        Ok(())
    }

    pub fn set_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut deadlines = self.shared.deadlines.lock();
        deadlines.read = deadline;
        deadlines.write = deadline;
        Ok(())
    }

    /// Shut the stream down; later calls report the first outcome
    pub async fn close(&self) -> Result<(), TransportError> {
        let shared = &self.shared;
        let outcome = shared
            .closed
            .get_or_init(|| async { shared.io.shutdown().await.err().map(|e| e.kind()) })
            .await;

        match outcome {
            None => Ok(()),
            Some(kind) => Err(TransportError::Io(io::Error::new(
                *kind,
                "stream shutdown failed",
            ))),
        }
    }

    pub fn local_addr(&self) -> &CanonicalAddress {
        &self.shared.local
    }

    pub fn peer_addr(&self) -> &CanonicalAddress {
        &self.shared.peer
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.initialized()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

async fn with_deadline<T>(
    deadline: Option<Instant>,
    op: &'static str,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, TransportError> {
    match deadline {
        None => Ok(fut.await?),
        Some(at) => match tokio::time::timeout_at(at, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(TransportError::Timeout { op }),
        },
    }
}

impl std::fmt::Debug for PlainConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainConnection")
            .field("peer", &self.shared.peer.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_bytes_pass_unmodified() {
        let (local, mut remote) = tokio::io::duplex(64);
        let conn = PlainConnection::new(Box::new(local));

        // Control-frame shaped bytes are ordinary payload here
        remote.write_all(&[0x10, b'c']).await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(conn.read(&mut buf).await.unwrap(), 2);

        conn.write(b"ok").await.unwrap();
        let mut reply = [0u8; 2];
        remote.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_blocked_read() {
        let (local, _remote) = tokio::io::duplex(64);
        let conn = PlainConnection::new(Box::new(local));

        conn.set_read_deadline(Some(Instant::now() + Duration::from_millis(50)))
            .unwrap();
        let mut buf = [0u8; 8];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (local, mut remote) = tokio::io::duplex(64);
        let conn = PlainConnection::new(Box::new(local));

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(matches!(conn.write(b"x").await, Err(TransportError::Closed)));
        assert!(conn.set_deadline(None).is_err());

        let mut buf = [0u8; 8];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }
}
