//! Handshake gate: admits inbound connections that present the magic byte
//!
//! An internal accept loop takes raw connections off the transport listener
//! and spawns one task per connection to finish transport establishment and
//! read the admission token. Outcomes reach [`HandshakeGate::accept`]
//! through a channel in completion order, so a silent peer only ever costs
//! its own task the handshake timeout.

use crate::addr::NativeAddr;
use crate::connection::GuardedConnection;
use crate::error::TransportError;
use crate::transport::{BoxedStream, PendingStream, TransportAcceptor, TransportStream};
use gated_wire::{timing, Magic};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Admitted connections waiting for `accept`
const BACKLOG: usize = 100;

/// What an inbound connection must satisfy to be admitted
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    pub magic: Magic,
    /// Bound on reading the admission token
    pub handshake_timeout: Duration,
    /// Bound on transport-level establishment before the token read
    pub establish_timeout: Duration,
    /// Grace period handed to admitted connections
    pub close_grace: Duration,
}

impl AdmissionPolicy {
    pub fn new(magic: Magic) -> Self {
        Self {
            magic,
            handshake_timeout: Duration::from_millis(timing::HANDSHAKE_TIMEOUT_MS),
            establish_timeout: Duration::from_millis(timing::QUIC_HANDSHAKE_TIMEOUT_MS),
            close_grace: Duration::from_millis(timing::CLOSE_GRACE_MS),
        }
    }
}

type Outcome = Result<GuardedConnection, TransportError>;

/// Listener wrapper that only yields admitted connections
pub struct HandshakeGate {
    admitted: mpsc::Receiver<Outcome>,
    accept_loop: JoinHandle<()>,
    local: NativeAddr,
    name: &'static str,
    closed: bool,
}

impl HandshakeGate {
    /// Start gating `acceptor`; must be called inside a Tokio runtime
    pub fn new<A: TransportAcceptor>(
        acceptor: A,
        policy: AdmissionPolicy,
    ) -> Result<Self, TransportError> {
        let local = acceptor.local_addr()?;
        let name = acceptor.name();
        let (tx, rx) = mpsc::channel(BACKLOG);

        info!("{} listener on {} (magic {})", name, local, policy.magic);
        let accept_loop = tokio::spawn(accept_loop(acceptor, Arc::new(policy), tx));

        Ok(Self {
            admitted: rx,
            accept_loop,
            local,
            name,
            closed: false,
        })
    }

    /// Next admitted connection
    ///
    /// A rejected peer surfaces as an error with `is_temporary() == true`;
    /// keep accepting. A listener failure is reported once, after which
    /// every call returns `ListenerClosed`.
    pub async fn accept(&mut self) -> Outcome {
        if self.closed {
            return Err(TransportError::ListenerClosed);
        }
        match self.admitted.recv().await {
            Some(outcome) => outcome,
            None => {
                self.closed = true;
                Err(TransportError::ListenerClosed)
            }
        }
    }

    /// Stop accepting and release the transport listener
    pub fn close(&mut self) {
        if !self.closed {
            debug!("Closing {} listener on {}", self.name, self.local);
        }
        self.closed = true;
        self.accept_loop.abort();
        self.admitted.close();

        // Admitted but never accepted: the peer still gets a close frame
        while let Ok(outcome) = self.admitted.try_recv() {
            if let Ok(conn) = outcome {
                tokio::spawn(async move {
                    let _ = conn.close().await;
                });
            }
        }
    }

    pub fn local_addr(&self) -> &NativeAddr {
        &self.local
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for HandshakeGate {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn accept_loop<A: TransportAcceptor>(
    mut acceptor: A,
    policy: Arc<AdmissionPolicy>,
    admitted: mpsc::Sender<Outcome>,
) {
    loop {
        let pending = tokio::select! {
            _ = admitted.closed() => return,
            res = acceptor.accept() => res,
        };

        let pending = match pending {
            Ok(pending) => pending,
            Err(e) => {
                warn!("{} listener failed: {}", acceptor.name(), e);
                let _ = admitted.send(Err(TransportError::Io(e))).await;
                return;
            }
        };

        let admitted = admitted.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            let outcome = admit(pending, &policy).await;
            if let Err(e) = &outcome {
                debug!("{}", e);
            }
            if let Err(mpsc::error::SendError(Ok(conn))) = admitted.send(outcome).await {
                let _ = conn.close().await;
            }
        });
    }
}

async fn admit(pending: PendingStream, policy: &AdmissionPolicy) -> Outcome {
    let stream = match tokio::time::timeout(policy.establish_timeout, pending).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(TransportError::rejected(
                "unestablished peer",
                format!("transport setup failed: {}", e),
            ))
        }
        Err(_) => {
            return Err(TransportError::rejected(
                "unestablished peer",
                "transport setup timed out",
            ))
        }
    };

    handshake(stream, policy).await
}

/// Read and verify the admission token on a freshly accepted stream
///
/// On any failure the raw stream is shut down and a temporary rejection is
/// returned.
pub async fn handshake(mut stream: BoxedStream, policy: &AdmissionPolicy) -> Outcome {
    let peer = stream.peer_addr();
    let mut token = [0u8; 1];

    let read = tokio::time::timeout(policy.handshake_timeout, stream.read_exact(&mut token)).await;
    let reason = match read {
        Ok(Ok(_)) => match policy.magic.check_token(token[0]) {
            Ok(()) => {
                debug!("Admitted {}", peer);
                return Ok(GuardedConnection::new(
                    stream,
                    policy.magic,
                    policy.close_grace,
                ));
            }
            Err(e) => e.to_string(),
        },
        Ok(Err(e)) => format!("handshake read failed: {}", e),
        Err(_) => format!(
            "no handshake within {}ms",
            policy.handshake_timeout.as_millis()
        ),
    };

    let _ = tokio::time::timeout(
        policy.handshake_timeout,
        TransportStream::shutdown(&mut stream),
    )
    .await;
    Err(TransportError::rejected(peer, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::time::Instant;

    const MAGIC: Magic = Magic::new(0x10);

    /// Acceptor fed by the test through a channel
    struct ChannelAcceptor(mpsc::Receiver<io::Result<DuplexStream>>);

    #[async_trait]
    impl TransportAcceptor for ChannelAcceptor {
        async fn accept(&mut self) -> io::Result<PendingStream> {
            match self.0.recv().await {
                Some(Ok(stream)) => {
                    let stream: BoxedStream = Box::new(stream);
                    Ok(Box::pin(futures::future::ready(Ok(stream))))
                }
                Some(Err(e)) => Err(e),
                None => std::future::pending().await,
            }
        }

        fn local_addr(&self) -> io::Result<NativeAddr> {
            Ok(NativeAddr::Other("channel".into()))
        }

        fn name(&self) -> &'static str {
            "channel"
        }
    }

    fn gate() -> (HandshakeGate, mpsc::Sender<io::Result<DuplexStream>>) {
        let (tx, rx) = mpsc::channel(8);
        let gate = HandshakeGate::new(ChannelAcceptor(rx), AdmissionPolicy::new(MAGIC)).unwrap();
        (gate, tx)
    }

    async fn connect(tx: &mpsc::Sender<io::Result<DuplexStream>>) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(64);
        tx.send(Ok(local)).await.unwrap();
        remote
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_magic_admitted_quickly() {
        let (mut gate, tx) = gate();
        let mut peer = connect(&tx).await;
        peer.write_all(&[0x10]).await.unwrap();
        peer.write_all(b"CONNECT").await.unwrap();

        let started = Instant::now();
        let conn = gate.accept().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));

        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"CONNECT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_magic_rejected_and_shut_down() {
        let (mut gate, tx) = gate();
        let mut peer = connect(&tx).await;
        peer.write_all(&[0x74]).await.unwrap();

        let err = gate.accept().await.unwrap_err();
        assert!(err.is_temporary());

        let mut buf = [0u8; 4];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_rejected_after_timeout() {
        let (mut gate, tx) = gate();
        let _peer = connect(&tx).await;

        let started = Instant::now();
        let err = gate.accept().await.unwrap_err();
        assert!(err.is_temporary());
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_peer_does_not_block_others() {
        let (mut gate, tx) = gate();
        let _silent = connect(&tx).await;
        let mut prompt = connect(&tx).await;
        prompt.write_all(&[0x10]).await.unwrap();

        let started = Instant::now();
        assert!(gate.accept().await.is_ok());
        assert!(started.elapsed() < Duration::from_millis(200));

        assert!(gate.accept().await.unwrap_err().is_temporary());
    }

    #[tokio::test]
    async fn test_listener_failure_reported_once() {
        let (mut gate, tx) = gate();
        tx.send(Err(io::Error::new(io::ErrorKind::Other, "socket gone")))
            .await
            .unwrap();

        assert!(matches!(gate.accept().await, Err(TransportError::Io(_))));
        assert!(matches!(
            gate.accept().await,
            Err(TransportError::ListenerClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_sends_close_frame_to_unaccepted() {
        let (mut gate, tx) = gate();
        let mut peer = connect(&tx).await;
        peer.write_all(&[0x10]).await.unwrap();

        // Let the admission task finish and queue the connection
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.close();

        let mut frame = [0u8; 2];
        peer.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [0x10, b'c']);
        assert_eq!(peer.read(&mut frame).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_after_close_is_closed() {
        let (mut gate, tx) = gate();
        let mut peer = connect(&tx).await;

        // Handshake still in flight when the gate closes
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.close();
        peer.write_all(&[0x10]).await.unwrap();

        let mut frame = [0u8; 2];
        peer.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [0x10, b'c']);
    }

    #[tokio::test]
    async fn test_close_stops_accepting() {
        let (mut gate, _tx) = gate();
        assert_eq!(gate.name(), "channel");
        assert_eq!(gate.local_addr().to_string(), "channel");

        gate.close();
        assert!(matches!(
            gate.accept().await,
            Err(TransportError::ListenerClosed)
        ));
    }
}
