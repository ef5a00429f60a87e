//! Guarded connection
//!
//! Wraps one admitted raw stream. Reads watch for control frames from the
//! peer, deadlines are checked when an operation starts, and close runs its
//! sequence exactly once: close frame, grace period, raw shutdown.

use super::deadline::Deadlines;
use super::split::SplitStream;
use crate::addr::CanonicalAddress;
use crate::error::TransportError;
use crate::transport::BoxedStream;
use crate::transport::TransportStream;
use gated_wire::codec::classify;
use gated_wire::{ControlFrame, Inbound, Lifecycle, LinkEvent, LinkState, Magic};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Connection handle over an admitted raw stream
///
/// Clones share the same connection. Reads and writes may run concurrently
/// with each other and with `close`; callers serialize their own writes.
#[derive(Clone)]
pub struct GuardedConnection {
    shared: Arc<Shared>,
}

struct Shared {
    magic: Magic,
    io: SplitStream<BoxedStream>,
    deadlines: Mutex<Deadlines>,
    lifecycle: Lifecycle,
    /// Survives the move into Closing so reads stay at end-of-stream
    peer_closed: AtomicBool,
    /// Set once the close sequence has finished; holds the shutdown error kind
    close_outcome: OnceCell<Option<io::ErrorKind>>,
    grace: Duration,
    local: CanonicalAddress,
    peer: CanonicalAddress,
}

impl GuardedConnection {
    pub fn new(stream: BoxedStream, magic: Magic, grace: Duration) -> Self {
        let local = CanonicalAddress::normalize(stream.local_addr());
        let peer = CanonicalAddress::normalize(stream.peer_addr());

        Self {
            shared: Arc::new(Shared {
                magic,
                io: SplitStream::new(stream),
                deadlines: Mutex::new(Deadlines::default()),
                lifecycle: Lifecycle::new(),
                peer_closed: AtomicBool::new(false),
                close_outcome: OnceCell::new(),
                grace,
                local,
                peer,
            }),
        }
    }

    /// Read payload bytes
    ///
    /// Returns `Ok(0)` at end-of-stream: after the peer's close frame, after a
    /// local close, or when the raw stream fails. A standalone heartbeat frame
    /// is consumed and the read continues.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            if self.shared.deadlines.lock().read_expired(Instant::now()) {
                return Err(TransportError::Timeout { op: "read" });
            }
            if self.peer_closed() || self.shared.lifecycle.state().read_finished() {
                return Ok(0);
            }

            let n = match self.shared.io.read(buf).await {
                Ok(n) => n,
                Err(e) => {
                    debug!("Read from {} ended: {}", self.shared.peer, e);
                    return Ok(0);
                }
            };

            match classify(self.shared.magic, &buf[..n]) {
                Inbound::Payload => return Ok(n),
                Inbound::Close => {
                    debug!("Close frame from {}", self.shared.peer);
                    self.shared.peer_closed.store(true, Ordering::Release);
                    self.shared.lifecycle.process_event(LinkEvent::PeerCloseFrame);
                    return Ok(0);
                }
                Inbound::Heartbeat => {
                    trace!("Heartbeat from {}", self.shared.peer);
                }
            }
        }
    }

    /// Write `buf` unmodified; returns its full length
    pub async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        if self.shared.deadlines.lock().write_expired(Instant::now()) {
            return Err(TransportError::Timeout { op: "write" });
        }
        self.ensure_writable()?;

        self.shared.io.write_all(buf).await.map_err(|e| {
            if self.shared.lifecycle.state().accepts_writes() {
                TransportError::Io(e)
            } else {
                TransportError::Closed
            }
        })?;
        Ok(buf.len())
    }

    /// Send a heartbeat frame to the peer
    pub async fn send_heartbeat(&self) -> Result<(), TransportError> {
        self.ensure_writable()?;
        let frame = ControlFrame::heartbeat(self.shared.magic).encode();
        self.shared.io.write_all(&frame).await?;
        Ok(())
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

    /// Set both deadlines at once
    pub fn set_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut deadlines = self.shared.deadlines.lock();
        deadlines.read = deadline;
        deadlines.write = deadline;
        Ok(())
    }

    /// Close the connection
    ///
    /// The first call sends the close frame, waits out the grace period and
    /// shuts the raw stream down. Every other call, concurrent or later,
    /// waits for that to finish and reports the same outcome.
    pub async fn close(&self) -> Result<(), TransportError> {
        let shared = &self.shared;
        let outcome = shared
            .close_outcome
            .get_or_init(|| shared.run_close())
            .await;

        match outcome {
            None => Ok(()),
            Some(kind) => Err(TransportError::Io(io::Error::new(
                *kind,
                "raw stream shutdown failed",
            ))),
        }
    }

    pub fn local_addr(&self) -> &CanonicalAddress {
        &self.shared.local
    }

    pub fn peer_addr(&self) -> &CanonicalAddress {
        &self.shared.peer
    }

    pub fn magic(&self) -> Magic {
        self.shared.magic
    }

    pub fn state(&self) -> LinkState {
        self.shared.lifecycle.state()
    }

    /// Whether the peer has sent its close frame
    pub fn peer_closed(&self) -> bool {
        self.shared.peer_closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        match self.shared.lifecycle.state() {
            LinkState::Closing | LinkState::Closed => Err(TransportError::Closed),
            LinkState::Open | LinkState::PeerClosed => Ok(()),
        }
    }

    fn ensure_writable(&self) -> Result<(), TransportError> {
        if self.shared.lifecycle.state().accepts_writes() {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

impl Shared {
    async fn run_close(&self) -> Option<io::ErrorKind> {
        self.lifecycle.process_event(LinkEvent::CloseStarted);
        debug!("Closing connection to {}", self.peer);

        let frame = ControlFrame::close(self.magic).encode();
        match tokio::time::timeout(self.grace, self.io.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Close frame to {} not sent: {}", self.peer, e),
            Err(_) => debug!("Close frame to {} timed out", self.peer),
        }

        tokio::time::sleep(self.grace).await;

        let result = self.io.shutdown().await;
        self.lifecycle.process_event(LinkEvent::CloseFinished);

        match result {
            Ok(()) => None,
            Err(e) => {
                debug!("Shutdown of {} failed: {}", self.peer, e);
                Some(e.kind())
            }
        }
    }
}

impl std::fmt::Debug for GuardedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedConnection")
            .field("magic", &self.shared.magic)
            .field("peer", &self.shared.peer.to_string())
            .field("state", &self.shared.lifecycle.state())
            .finish()
    }
}
