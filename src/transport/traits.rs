//! Transport trait abstraction for pluggable network backends

use crate::addr::NativeAddr;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// A transport stream that can read and write bytes
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> io::Result<()>;

    /// Local address as the transport reports it
    fn local_addr(&self) -> NativeAddr;

    /// Remote address as the transport reports it
    fn peer_addr(&self) -> NativeAddr;
}

/// Raw connection of any transport
pub type BoxedStream = Box<dyn TransportStream>;

#[async_trait]
impl TransportStream for BoxedStream {
    async fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown().await
    }

    fn local_addr(&self) -> NativeAddr {
        (**self).local_addr()
    }

    fn peer_addr(&self) -> NativeAddr {
        (**self).peer_addr()
    }
}

/// Factory for creating transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Attempt to connect, returning a stream on success
    async fn connect(&self, target: SocketAddr) -> io::Result<BoxedStream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// A stream whose transport-level establishment is still in progress
pub type PendingStream = BoxFuture<'static, io::Result<BoxedStream>>;

/// Source of inbound transport connections
///
/// `accept` returns as soon as a peer shows up. Anything slow (TLS or QUIC
/// handshakes, waiting for the first stream) lives in the returned future so
/// callers can drive it off the accept path.
#[async_trait]
pub trait TransportAcceptor: Send + 'static {
    async fn accept(&mut self) -> io::Result<PendingStream>;

    fn local_addr(&self) -> io::Result<NativeAddr>;

    fn name(&self) -> &'static str;
}
