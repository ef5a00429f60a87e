//! KCP transport over UDP

use crate::addr::NativeAddr;
use crate::transport::traits::{
    BoxedStream, PendingStream, TransportAcceptor, TransportConnector, TransportStream,
};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;
use tokio_kcp::{KcpConfig, KcpListener, KcpStream};

fn kcp_error(err: impl fmt::Display) -> io::Error {
    io::Error::other(err.to_string())
}

/// KCP session wrapper implementing TransportStream
pub struct KcpTransportStream {
    inner: KcpStream,
    local: NativeAddr,
    peer: NativeAddr,
}

impl KcpTransportStream {
    pub fn new(stream: KcpStream, local: SocketAddr, peer: SocketAddr) -> Self {
        Self {
            inner: stream,
            local: NativeAddr::Datagram(local),
            peer: NativeAddr::Datagram(peer),
        }
    }
}

impl AsyncRead for KcpTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for KcpTransportStream {
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
impl TransportStream for KcpTransportStream {
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

/// KCP connector; each dial gets its own UDP socket
pub struct KcpConnector {
    config: KcpConfig,
}

impl KcpConnector {
    pub fn new(config: KcpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportConnector for KcpConnector {
    async fn connect(&self, target: SocketAddr) -> io::Result<BoxedStream> {
        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        let local = socket.local_addr()?;

        let stream = KcpStream::connect_with_socket(&self.config, socket, target)
            .await
            .map_err(kcp_error)?;
        Ok(Box::new(KcpTransportStream::new(stream, local, target)))
    }

    fn name(&self) -> &'static str {
        "KCP"
    }
}

/// KCP listener; sessions appear once their first packet arrives
pub struct KcpAcceptor {
    listener: KcpListener,
}

impl KcpAcceptor {
    pub async fn bind(addr: SocketAddr, config: KcpConfig) -> io::Result<Self> {
        let listener = KcpListener::bind(config, addr).await.map_err(kcp_error)?;
        Ok(Self { listener })
    }
}

#[async_trait]
impl TransportAcceptor for KcpAcceptor {
    async fn accept(&mut self) -> io::Result<PendingStream> {
        let (stream, peer) = self.listener.accept().await.map_err(kcp_error)?;
        let local = self.listener.local_addr()?;

        let stream: BoxedStream = Box::new(KcpTransportStream::new(stream, local, peer));
        Ok(Box::pin(futures::future::ready(Ok(stream))))
    }

    fn local_addr(&self) -> io::Result<NativeAddr> {
        Ok(NativeAddr::Datagram(self.listener.local_addr()?))
    }

    fn name(&self) -> &'static str {
        "KCP"
    }
}
