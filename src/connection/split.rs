//! Independently lockable read and write halves of one raw stream

use crate::transport::TransportStream;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};

/// A raw stream split so a blocked read never holds up a write or teardown
///
/// Once [`SplitStream::shutdown`] has started, pending and future reads end
/// with `Ok(0)` and writes fail with `NotConnected`.
pub(crate) struct SplitStream<S> {
    reader: Mutex<Option<ReadHalf<S>>>,
    writer: Mutex<Option<WriteHalf<S>>>,
    closing: watch::Sender<bool>,
}

impl<S: TransportStream> SplitStream<S> {
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (closing, _) = watch::channel(false);
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closing,
        }
    }

    /// One read from the raw stream
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.closing.subscribe();

        let mut guard = tokio::select! {
            guard = self.reader.lock() => guard,
            _ = closed(&mut rx) => return Ok(0),
        };
        let Some(reader) = guard.as_mut() else {
            return Ok(0);
        };

        tokio::select! {
            res = reader.read(buf) => res,
            _ = closed(&mut rx) => Ok(0),
        }
    }

    /// Write all of `buf` and flush it
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut rx = self.closing.subscribe();

        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = closed(&mut rx) => return Err(not_connected()),
        };
        let writer = guard.as_mut().ok_or_else(not_connected)?;

        tokio::select! {
            res = async {
                writer.write_all(buf).await?;
                writer.flush().await
            } => res,
            _ = closed(&mut rx) => Err(not_connected()),
        }
    }

    /// Wake everything pending, reassemble the stream and shut it down
    ///
    /// Only the first call reaches the raw stream.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.closing.send_replace(true);

        let reader = self.reader.lock().await.take();
        let writer = self.writer.lock().await.take();
        match (reader, writer) {
            (Some(reader), Some(writer)) => {
                let mut stream = reader.unsplit(writer);
                TransportStream::shutdown(&mut stream).await
            }
            _ => Ok(()),
        }
    }
}

async fn closed(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream is shut down")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    #[tokio::test]
    async fn test_read_and_write() {
        let (local, mut remote) = tokio::io::duplex(64);
        let split = SplitStream::new(local);

        split.write_all(b"abc").await.unwrap();
        let mut buf = [0u8; 3];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");

        remote.write_all(b"xyz").await.unwrap();
        let n = split.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"xyz");
    }

    #[tokio::test]
    async fn test_write_not_blocked_by_pending_read() {
        let (local, mut remote) = tokio::io::duplex(64);
        let split = Arc::new(SplitStream::new(local));

        let reader = split.clone();
        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).await
        });
        tokio::task::yield_now().await;

        tokio::time::timeout(Duration::from_secs(1), split.write_all(b"go"))
            .await
            .expect("write blocked behind read")
            .unwrap();

        let mut buf = [0u8; 2];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"go");
        pending.abort();
    }

    #[tokio::test]
    async fn test_shutdown_wakes_pending_read() {
        let (local, _remote) = tokio::io::duplex(64);
        let split: Arc<SplitStream<DuplexStream>> = Arc::new(SplitStream::new(local));

        let reader = split.clone();
        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).await
        });
        tokio::task::yield_now().await;

        split.shutdown().await.unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), 0);

        let mut buf = [0u8; 8];
        assert_eq!(split.read(&mut buf).await.unwrap(), 0);
        let err = split.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_shutdown_reaches_peer() {
        let (local, mut remote) = tokio::io::duplex(64);
        let split = SplitStream::new(local);

        split.shutdown().await.unwrap();
        split.shutdown().await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }
}
