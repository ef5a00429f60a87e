//! QUIC transport: one bidirectional stream per connection
//!
//! The dialer opens its stream right after the connection is established; the
//! listener waits for the peer's first bidirectional stream. The stream and
//! the connection that owns it are carried together so shutdown can tear
//! down both.

use crate::addr::NativeAddr;
use crate::error::TransportError;
use crate::tls::TlsContext;
use crate::transport::traits::{
    BoxedStream, PendingStream, TransportAcceptor, TransportConnector, TransportStream,
};
use async_trait::async_trait;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{Connection, Endpoint, RecvStream, SendStream, VarInt};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

/// Name presented in the TLS handshake; certificates are not verified
const SERVER_NAME: &str = "localhost";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// A QUIC bidirectional stream together with its connection
pub struct QuicStream {
    send: SendStream,
    recv: RecvStream,
    connection: Connection,
    local: NativeAddr,
    peer: NativeAddr,
    /// Dial side owns its endpoint; dropping it would stop the driver
    _endpoint: Option<Endpoint>,
}

impl QuicStream {
    fn new(
        connection: Connection,
        send: SendStream,
        recv: RecvStream,
        local: SocketAddr,
        endpoint: Option<Endpoint>,
    ) -> Self {
        let peer = NativeAddr::Datagram(connection.remote_address());
        Self {
            send,
            recv,
            connection,
            local: NativeAddr::Datagram(local),
            peer,
            _endpoint: endpoint,
        }
    }
}

impl AsyncRead for QuicStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        AsyncRead::poll_read(Pin::new(&mut self.recv), cx, buf)
    }
}

impl AsyncWrite for QuicStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.send), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.send), cx)
    }
}

#[async_trait]
impl TransportStream for QuicStream {
    async fn shutdown(&mut self) -> io::Result<()> {
        // The stream may already be finished or reset by the peer
        let _ = self.send.finish();
        self.connection.close(VarInt::from_u32(0), b"closed");
        Ok(())
    }

    fn local_addr(&self) -> NativeAddr {
        self.local.clone()
    }

    fn peer_addr(&self) -> NativeAddr {
        self.peer.clone()
    }
}

/// Dials QUIC connections from a fresh client endpoint each time
pub struct QuicConnector {
    client_config: quinn::ClientConfig,
    handshake_timeout: Duration,
}

impl QuicConnector {
    pub fn new(
        tls: rustls::ClientConfig,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let crypto = QuicClientConfig::try_from(tls).map_err(TransportError::tls)?;

        let mut client_config = quinn::ClientConfig::new(Arc::new(crypto));
        let mut transport = quinn::TransportConfig::default();
        transport.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));
        client_config.transport_config(Arc::new(transport));

        Ok(Self {
            client_config,
            handshake_timeout,
        })
    }
}

#[async_trait]
impl TransportConnector for QuicConnector {
    async fn connect(&self, target: SocketAddr) -> io::Result<BoxedStream> {
        let bind: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let endpoint = Endpoint::client(bind)?;
        let local = endpoint.local_addr()?;

        let establish = async {
            let connecting = endpoint
                .connect_with(self.client_config.clone(), target, SERVER_NAME)
                .map_err(io::Error::other)?;
            let connection = connecting.await.map_err(io::Error::from)?;
            let (send, recv) = connection.open_bi().await.map_err(io::Error::from)?;
            Ok::<_, io::Error>((connection, send, recv))
        };

        let (connection, send, recv) = tokio::time::timeout(self.handshake_timeout, establish)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "QUIC handshake timed out"))??;

        debug!("QUIC stream open to {}", target);
        Ok(Box::new(QuicStream::new(
            connection,
            send,
            recv,
            local,
            Some(endpoint),
        )))
    }

    fn name(&self) -> &'static str {
        "QUIC"
    }
}

/// Accepts QUIC connections and their first bidirectional stream
pub struct QuicAcceptor {
    endpoint: Endpoint,
}

impl QuicAcceptor {
    pub fn bind(addr: SocketAddr, tls: &TlsContext) -> Result<Self, TransportError> {
        let crypto =
            QuicServerConfig::try_from(tls.server_config()?).map_err(TransportError::tls)?;

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        if let Some(transport) = Arc::get_mut(&mut server_config.transport) {
            transport.max_concurrent_uni_streams(0_u8.into());
        }

        let endpoint = Endpoint::server(server_config, addr)?;
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl TransportAcceptor for QuicAcceptor {
    async fn accept(&mut self) -> io::Result<PendingStream> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "QUIC endpoint closed"))?;
        let local = self.endpoint.local_addr()?;

        Ok(Box::pin(async move {
            let connection = incoming.await.map_err(io::Error::from)?;
            let (send, recv) = connection.accept_bi().await.map_err(io::Error::from)?;
            Ok(Box::new(QuicStream::new(connection, send, recv, local, None)) as BoxedStream)
        }))
    }

    fn local_addr(&self) -> io::Result<NativeAddr> {
        Ok(NativeAddr::Datagram(self.endpoint.local_addr()?))
    }

    fn name(&self) -> &'static str {
        "QUIC"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::TlsProvider;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn alpn() -> Vec<Vec<u8>> {
        vec![b"quic".to_vec()]
    }

    #[tokio::test]
    async fn test_quic_stream_roundtrip() {
        let provider = TlsProvider::new(alpn());
        let context = provider.get_or_create().unwrap();

        let mut acceptor = QuicAcceptor::bind("127.0.0.1:0".parse().unwrap(), &context).unwrap();
        let addr = match acceptor.local_addr().unwrap() {
            NativeAddr::Datagram(addr) => addr,
            other => panic!("unexpected listener address {}", other),
        };

        let server = tokio::spawn(async move {
            let pending = acceptor.accept().await.unwrap();
            let mut stream = pending.await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(b"world").await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            buf
        });

        let connector = QuicConnector::new(provider.client_config(), Duration::from_secs(2)).unwrap();
        assert_eq!(connector.name(), "QUIC");

        let mut client = connector.connect(addr).await.unwrap();
        assert_eq!(client.peer_addr(), NativeAddr::Datagram(addr));
        client.write_all(b"hello").await.unwrap();

        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"world");
        assert_eq!(&server.await.unwrap(), b"hello");

        TransportStream::shutdown(&mut client).await.unwrap();
    }

    #[tokio::test]
    async fn test_quic_connect_times_out() {
        // Nothing is listening on this socket, so the handshake never completes
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = silent.local_addr().unwrap();

        let connector = QuicConnector::new(
            crate::tls::insecure_client_config(alpn()),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = connector.connect(addr).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
