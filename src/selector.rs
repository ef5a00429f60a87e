//! Transport selector
//!
//! Routes dial and listen requests by network name. KCP and QUIC requests go
//! through admission and come back guarded; everything else goes to the
//! native stack untouched.

use crate::addr::{dialable, CanonicalAddress};
use crate::admission::{AdmissionDialer, AdmissionPolicy, HandshakeGate};
use crate::config::{SelectorConfig, TransportKind};
use crate::connection::{Connection, PlainConnection};
use crate::error::TransportError;
use crate::tls::{TlsContext, TlsProvider};
#[cfg(feature = "kcp")]
use crate::transport::{KcpAcceptor, KcpConnector};
use crate::transport::{
    native, resolve_socket, Network, QuicAcceptor, QuicConnector, TcpAcceptor, TransportAcceptor,
    TransportConnector,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Dialer and listener factory for one configuration
pub struct TransportSelector {
    config: SelectorConfig,
    tls: Arc<TlsProvider>,
}

impl TransportSelector {
    pub fn new(config: SelectorConfig) -> Self {
        let tls = Arc::new(TlsProvider::new(config.alpn_protocols()));
        Self { config, tls }
    }

    /// Share a TLS provider, e.g. one pre-loaded with a caller identity
    pub fn with_tls_provider(config: SelectorConfig, tls: Arc<TlsProvider>) -> Self {
        Self { config, tls }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn tls_provider(&self) -> &Arc<TlsProvider> {
        &self.tls
    }

    pub async fn dial(&self, network: &str, address: &str) -> Result<Connection, TransportError> {
        self.dial_with(network, address, None).await
    }

    /// Dial, giving up once `timeout` has elapsed
    pub async fn dial_timeout(
        &self,
        network: &str,
        address: &str,
        timeout: Duration,
    ) -> Result<Connection, TransportError> {
        match tokio::time::timeout(timeout, self.dial_with(network, address, None)).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::dial(
                address,
                io::Error::new(io::ErrorKind::TimedOut, "dial timed out"),
            )),
        }
    }

    /// Dial with a caller-supplied TLS client configuration
    pub async fn dial_tls(
        &self,
        network: &str,
        address: &str,
        tls: Arc<rustls::ClientConfig>,
    ) -> Result<Connection, TransportError> {
        self.dial_with(network, address, Some(tls)).await
    }

    pub async fn listen(&self, network: &str, address: &str) -> Result<Listener, TransportError> {
        self.listen_with(network, address, None).await
    }

    /// Listen with a caller-supplied TLS identity
    pub async fn listen_tls(
        &self,
        network: &str,
        address: &str,
        tls: Arc<TlsContext>,
    ) -> Result<Listener, TransportError> {
        self.listen_with(network, address, Some(tls)).await
    }

    async fn dial_with(
        &self,
        network: &str,
        address: &str,
        tls: Option<Arc<rustls::ClientConfig>>,
    ) -> Result<Connection, TransportError> {
        let kind = match Network::parse(network, self.config.route_tcp_to) {
            Network::Native(name) => {
                let stream = native::dial(&name, address, tls)
                    .await
                    .map_err(|e| native_error(&name, address, e))?;
                return Ok(PlainConnection::new(stream).into());
            }
            routed => routed.kind(),
        };
        let kind = kind.ok_or_else(|| TransportError::UnsupportedNetwork(network.to_string()))?;

        let address = dialable(address);
        let target = resolve_socket("udp", &address)
            .await
            .map_err(|e| TransportError::dial(&address, e))?;

        let dialer = AdmissionDialer::new(
            self.connector(kind, tls)?,
            self.config.magic_for(kind),
            self.config.close_grace,
        );
        Ok(dialer.dial(target).await?.into())
    }

    fn connector(
        &self,
        kind: TransportKind,
        tls: Option<Arc<rustls::ClientConfig>>,
    ) -> Result<Box<dyn TransportConnector>, TransportError> {
        match kind {
            #[cfg(feature = "kcp")]
            TransportKind::ReliableDatagram => Ok(Box::new(KcpConnector::new(self.config.kcp.clone()))),
            #[cfg(not(feature = "kcp"))]
            TransportKind::ReliableDatagram => Err(TransportError::UnsupportedNetwork(kind.to_string())),
            TransportKind::MultiplexedStream => {
                let tls = match tls {
                    Some(config) => (*config).clone(),
                    None => self.tls.client_config(),
                };
                Ok(Box::new(QuicConnector::new(
                    tls,
                    self.config.quic_handshake_timeout,
                )?))
            }
        }
    }

    async fn listen_with(
        &self,
        network: &str,
        address: &str,
        tls: Option<Arc<TlsContext>>,
    ) -> Result<Listener, TransportError> {
        let kind = match Network::parse(network, self.config.route_tcp_to) {
            Network::Native(name) => {
                let server_config = match tls {
                    Some(context) => Some(Arc::new(context.server_config()?)),
                    None => None,
                };
                let acceptor = TcpAcceptor::bind(&name, address, server_config)
                    .await
                    .map_err(|e| native_error(&name, address, e))?;
                return Ok(Listener::Native(NativeListener::new(
                    acceptor,
                    self.config.quic_handshake_timeout,
                )?));
            }
            routed => routed.kind(),
        };
        let kind = kind.ok_or_else(|| TransportError::UnsupportedNetwork(network.to_string()))?;

        let addr = resolve_socket("udp", address).await?;
        let policy = self.policy(kind);

        match kind {
            #[cfg(feature = "kcp")]
            TransportKind::ReliableDatagram => {
                let acceptor = KcpAcceptor::bind(addr, self.config.kcp.clone()).await?;
                Ok(Listener::Gated(HandshakeGate::new(acceptor, policy)?))
            }
            #[cfg(not(feature = "kcp"))]
            TransportKind::ReliableDatagram => Err(TransportError::UnsupportedNetwork(kind.to_string())),
            TransportKind::MultiplexedStream => {
                let context = match tls {
                    Some(context) => context,
                    None => self.tls.get_or_create()?,
                };
                let acceptor = QuicAcceptor::bind(addr, &context)?;
                Ok(Listener::Gated(HandshakeGate::new(acceptor, policy)?))
            }
        }
    }

    fn policy(&self, kind: TransportKind) -> AdmissionPolicy {
        AdmissionPolicy {
            magic: self.config.magic_for(kind),
            handshake_timeout: self.config.handshake_timeout,
            establish_timeout: self.config.quic_handshake_timeout,
            close_grace: self.config.close_grace,
        }
    }
}

impl Default for TransportSelector {
    fn default() -> Self {
        Self::new(SelectorConfig::default())
    }
}

fn native_error(network: &str, address: &str, err: io::Error) -> TransportError {
    if err.kind() == io::ErrorKind::Unsupported {
        TransportError::UnsupportedNetwork(network.to_string())
    } else {
        TransportError::dial(address, err)
    }
}

/// Listener returned by the selector
pub enum Listener {
    /// KCP or QUIC behind the admission handshake
    Gated(HandshakeGate),
    /// Native TCP or TLS
    Native(NativeListener),
}

impl Listener {
    /// Next connection; errors with `is_temporary()` leave the listener usable
    pub async fn accept(&mut self) -> Result<Connection, TransportError> {
        match self {
            Listener::Gated(gate) => Ok(gate.accept().await?.into()),
            Listener::Native(listener) => listener.accept().await,
        }
    }

    pub fn close(&mut self) {
        match self {
            Listener::Gated(gate) => gate.close(),
            Listener::Native(listener) => listener.close(),
        }
    }

    pub fn local_addr(&self) -> CanonicalAddress {
        match self {
            Listener::Gated(gate) => CanonicalAddress::normalize(gate.local_addr().clone()),
            Listener::Native(listener) => listener.local.clone(),
        }
    }
}

/// Native listener; connections pass through with no admission handshake
///
/// TLS handshakes run in their own tasks, bounded by the establishment
/// timeout, so a peer that never sends a ClientHello only delays itself.
pub struct NativeListener {
    accepted: mpsc::Receiver<Result<Connection, TransportError>>,
    accept_loop: JoinHandle<()>,
    local: CanonicalAddress,
    closed: bool,
}

impl NativeListener {
    fn new(acceptor: TcpAcceptor, establish_timeout: Duration) -> Result<Self, TransportError> {
        let local = CanonicalAddress::normalize(acceptor.local_addr()?);
        let (tx, rx) = mpsc::channel(NATIVE_BACKLOG);
        let accept_loop = tokio::spawn(native_accept_loop(
            acceptor,
            local.clone(),
            establish_timeout,
            tx,
        ));

        Ok(Self {
            accepted: rx,
            accept_loop,
            local,
            closed: false,
        })
    }

    async fn accept(&mut self) -> Result<Connection, TransportError> {
        if self.closed {
            return Err(TransportError::ListenerClosed);
        }
        match self.accepted.recv().await {
            Some(outcome) => outcome,
            None => {
                self.closed = true;
                Err(TransportError::ListenerClosed)
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            debug!("Closing native listener on {}", self.local);
        }
        self.closed = true;
        self.accept_loop.abort();
        self.accepted.close();
        while let Ok(outcome) = self.accepted.try_recv() {
            if let Ok(conn) = outcome {
                tokio::spawn(async move {
                    let _ = conn.close().await;
                });
            }
        }
    }
}

impl Drop for NativeListener {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

/// Accepted native connections waiting for `accept`
const NATIVE_BACKLOG: usize = 100;

async fn native_accept_loop(
    mut acceptor: TcpAcceptor,
    local: CanonicalAddress,
    establish_timeout: Duration,
    accepted: mpsc::Sender<Result<Connection, TransportError>>,
) {
    loop {
        let pending = tokio::select! {
            _ = accepted.closed() => return,
            res = acceptor.accept() => res,
        };

        let pending = match pending {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Native listener on {} failed: {}", local, e);
                let _ = accepted.send(Err(TransportError::Io(e))).await;
                return;
            }
        };

        let accepted = accepted.clone();
        let local = local.clone();
        tokio::spawn(async move {
            // A failed or stalled TLS handshake only loses this one peer
            let outcome = match tokio::time::timeout(establish_timeout, pending).await {
                Ok(Ok(stream)) => Ok(Connection::from(PlainConnection::new(stream))),
                Ok(Err(e)) => Err(TransportError::rejected(&local, e.to_string())),
                Err(_) => Err(TransportError::rejected(&local, "TLS handshake timed out")),
            };
            if let Err(e) = &outcome {
                debug!("{}", e);
            }
            if let Err(mpsc::error::SendError(Ok(conn))) = accepted.send(outcome).await {
                let _ = conn.close().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_native_tcp_passthrough() {
        let selector = TransportSelector::default();
        let mut listener = selector.listen("tcp", "127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        assert_eq!(addr.network(), "tcp");

        let address = addr.to_string();
        let client = tokio::spawn(async move {
            let selector = TransportSelector::default();
            let conn = selector.dial("tcp", &address).await.unwrap();
            conn.write(&[0x10, b'c']).await.unwrap();
            conn
        });

        let conn = listener.accept().await.unwrap();
        assert!(conn.as_guarded().is_none());

        // No admission byte and no control frames on the native path
        let mut buf = [0u8; 8];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x10, b'c']);

        let _client = client.await.unwrap();
        assert!(!selector.tls_provider().is_initialized());
    }

    #[tokio::test]
    async fn test_native_tls_roundtrip() {
        let selector = TransportSelector::default();
        let context = selector.tls_provider().get_or_create().unwrap();
        let mut listener = selector
            .listen_tls("tcp", "127.0.0.1:0", context)
            .await
            .unwrap();
        let address = format!("127.0.0.1:{}", listener.local_addr().port());

        let client_config = Arc::new(selector.tls_provider().client_config());
        let client = tokio::spawn(async move {
            let selector = TransportSelector::default();
            let conn = selector.dial_tls("tcp", &address, client_config).await.unwrap();
            conn.write(b"secret").await.unwrap();
            let mut buf = [0u8; 2];
            conn.read(&mut buf).await.unwrap();
        });

        let conn = listener.accept().await.unwrap();
        let mut buf = [0u8; 6];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"secret");
        conn.write(b"ok").await.unwrap();
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_tls_peer_does_not_block_accept() {
        let selector = TransportSelector::default();
        let context = selector.tls_provider().get_or_create().unwrap();
        let mut listener = selector
            .listen_tls("tcp", "127.0.0.1:0", context)
            .await
            .unwrap();
        let address = format!("127.0.0.1:{}", listener.local_addr().port());

        // Connects but never sends a ClientHello
        let _silent = tokio::net::TcpStream::connect(&address).await.unwrap();

        let client_config = Arc::new(selector.tls_provider().client_config());
        let client = tokio::spawn(async move {
            let selector = TransportSelector::default();
            let conn = selector.dial_tls("tcp", &address, client_config).await.unwrap();
            conn.write(b"hi").await.unwrap();
            conn
        });

        let conn = tokio::time::timeout(Duration::from_secs(1), listener.accept())
            .await
            .expect("accept stalled behind the silent peer")
            .unwrap();
        let mut buf = [0u8; 2];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");

        // The silent peer is turned away once the establishment bound passes
        let err = listener.accept().await.err().unwrap();
        assert!(err.is_temporary(), "unexpected error: {}", err);

        let _client = client.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_network() {
        let selector = TransportSelector::default();
        let err = selector.dial("unix", "/tmp/nats.sock").await.unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedNetwork(name) if name == "unix"));

        let err = selector.listen("udp", "127.0.0.1:0").await.err().unwrap();
        assert!(matches!(err, TransportError::UnsupportedNetwork(_)));
    }

    #[tokio::test]
    async fn test_native_dial_refused() {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = reserved.local_addr().unwrap().to_string();
        drop(reserved);

        let selector = TransportSelector::default();
        let err = selector.dial("tcp", &address).await.unwrap_err();
        assert!(matches!(err, TransportError::Dial { .. }));
    }

    #[tokio::test]
    async fn test_quic_listen_builds_tls_context_once() {
        let selector = TransportSelector::default();
        assert!(!selector.tls_provider().is_initialized());

        let mut first = selector.listen("quic", "127.0.0.1:0").await.unwrap();
        let generated = selector.tls_provider().get_or_create().unwrap();
        let mut second = selector.listen("quic", "127.0.0.1:0").await.unwrap();
        assert!(Arc::ptr_eq(
            &generated,
            &selector.tls_provider().get_or_create().unwrap()
        ));

        first.close();
        second.close();
    }
}
