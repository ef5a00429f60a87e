//! Native TCP, TLS-over-TCP and UDP transports
//!
//! These carry no admission token and no control frames. They exist so the
//! selector can hand any network it does not substitute straight to the
//! platform stack.

use super::resolve_socket;
use crate::addr::NativeAddr;
use crate::transport::traits::{BoxedStream, PendingStream, TransportAcceptor, TransportStream};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

/// TCP stream wrapper implementing TransportStream
pub struct TcpTransportStream {
    inner: TcpStream,
    local: NativeAddr,
    peer: NativeAddr,
}

impl TcpTransportStream {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let local = NativeAddr::Stream(stream.local_addr()?);
        let peer = NativeAddr::Stream(stream.peer_addr()?);
        Ok(Self {
            inner: stream,
            local,
            peer,
        })
    }
}

impl AsyncRead for TcpTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for TcpTransportStream {
    async fn shutdown(&mut self) -> io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await
    }

    fn local_addr(&self) -> NativeAddr {
        self.local.clone()
    }

    fn peer_addr(&self) -> NativeAddr {
        self.peer.clone()
    }
}

/// TLS session over TCP, either side of the handshake
pub struct TlsTransportStream {
    inner: TlsStream<TcpStream>,
    local: NativeAddr,
    peer: NativeAddr,
}

impl TlsTransportStream {
    fn new(inner: TlsStream<TcpStream>) -> io::Result<Self> {
        let tcp = inner.get_ref().0;
        let local = NativeAddr::Stream(tcp.local_addr()?);
        let peer = NativeAddr::Stream(tcp.peer_addr()?);
        Ok(Self { inner, local, peer })
    }
}

impl AsyncRead for TlsTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for TlsTransportStream {
    async fn shutdown(&mut self) -> io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await
    }

    fn local_addr(&self) -> NativeAddr {
        self.local.clone()
    }

    fn peer_addr(&self) -> NativeAddr {
        self.peer.clone()
    }
}

/// Connected UDP socket presented as a byte stream
///
/// Each read returns one datagram; each write sends one.
pub struct UdpTransportStream {
    socket: UdpSocket,
    local: NativeAddr,
    peer: NativeAddr,
}

impl UdpTransportStream {
    pub fn new(socket: UdpSocket) -> io::Result<Self> {
        let local = NativeAddr::Datagram(socket.local_addr()?);
        let peer = NativeAddr::Datagram(socket.peer_addr()?);
        Ok(Self {
            socket,
            local,
            peer,
        })
    }
}

impl AsyncRead for UdpTransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for UdpTransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl TransportStream for UdpTransportStream {
    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn local_addr(&self) -> NativeAddr {
        self.local.clone()
    }

    fn peer_addr(&self) -> NativeAddr {
        self.peer.clone()
    }
}

/// Dial a native network, optionally wrapping TCP in TLS
pub async fn dial(
    network: &str,
    address: &str,
    tls: Option<Arc<rustls::ClientConfig>>,
) -> io::Result<BoxedStream> {
    match network {
        "tcp" | "tcp4" | "tcp6" => {
            let target = resolve_socket(network, address).await?;
            let stream = TcpStream::connect(target).await?;
            stream.set_nodelay(true)?;

            match tls {
                None => Ok(Box::new(TcpTransportStream::new(stream)?)),
                Some(config) => {
                    let name = server_name(address)?;
                    let session = TlsConnector::from(config).connect(name, stream).await?;
                    Ok(Box::new(TlsTransportStream::new(session.into())?))
                }
            }
        }
        "udp" | "udp4" | "udp6" => {
            let target = resolve_socket(network, address).await?;
            let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let socket = UdpSocket::bind(bind).await?;
            socket.connect(target).await?;
            Ok(Box::new(UdpTransportStream::new(socket)?))
        }
        other => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot dial network {:?}", other),
        )),
    }
}

/// TLS server name for a `host:port` target
fn server_name(address: &str) -> io::Result<ServerName<'static>> {
    let host = address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(address)
        .trim_start_matches('[')
        .trim_end_matches(']');

    ServerName::try_from(host.to_string())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// TCP listener, optionally terminating TLS
pub struct TcpAcceptor {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl TcpAcceptor {
    pub async fn bind(
        network: &str,
        address: &str,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) -> io::Result<Self> {
        match network {
            "tcp" | "tcp4" | "tcp6" => {}
            "udp" | "udp4" | "udp6" => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "udp has no listener form",
                ))
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("cannot listen on network {:?}", other),
                ))
            }
        }

        let addr = resolve_socket(network, address).await?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            tls: tls.map(TlsAcceptor::from),
        })
    }
}

#[async_trait]
impl TransportAcceptor for TcpAcceptor {
    async fn accept(&mut self) -> io::Result<PendingStream> {
        let (stream, _) = self.listener.accept().await?;
        let tls = self.tls.clone();

        Ok(Box::pin(async move {
            stream.set_nodelay(true)?;
            match tls {
                None => Ok(Box::new(TcpTransportStream::new(stream)?) as BoxedStream),
                Some(acceptor) => {
                    let session = acceptor.accept(stream).await?;
                    Ok(Box::new(TlsTransportStream::new(session.into())?) as BoxedStream)
                }
            }
        }))
    }

    fn local_addr(&self) -> io::Result<NativeAddr> {
        Ok(NativeAddr::Stream(self.listener.local_addr()?))
    }

    fn name(&self) -> &'static str {
        if self.tls.is_some() {
            "TLS"
        } else {
            "TCP"
        }
    }
}
