//! Raw transports and network name routing

#[cfg(feature = "kcp")]
pub mod kcp;
pub mod native;
pub mod quic;
pub mod traits;

#[cfg(feature = "kcp")]
pub use kcp::{KcpAcceptor, KcpConnector, KcpTransportStream};
pub use native::{TcpAcceptor, TcpTransportStream, TlsTransportStream, UdpTransportStream};
pub use quic::{QuicAcceptor, QuicConnector, QuicStream};
pub use traits::{BoxedStream, PendingStream, TransportAcceptor, TransportConnector, TransportStream};

use crate::config::TransportKind;
use std::io;
use std::net::SocketAddr;

/// Where a network name is routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Network {
    /// Substituted by KCP
    ReliableDatagram,
    /// Substituted by QUIC
    MultiplexedStream,
    /// Handed to the platform stack unmodified
    Native(String),
}

impl Network {
    /// Route a network name, honoring a configured `tcp` substitution
    pub fn parse(name: &str, route_tcp_to: Option<TransportKind>) -> Self {
        match (name, route_tcp_to) {
            ("reliable-datagram" | "kcp", _) => Network::ReliableDatagram,
            ("multiplexed-stream" | "quic", _) => Network::MultiplexedStream,
            ("tcp", Some(TransportKind::ReliableDatagram)) => Network::ReliableDatagram,
            ("tcp" | "udp", Some(TransportKind::MultiplexedStream)) => Network::MultiplexedStream,
            (other, _) => Network::Native(other.to_string()),
        }
    }

    /// The substituted transport, if any
    pub fn kind(&self) -> Option<TransportKind> {
        match self {
            Network::ReliableDatagram => Some(TransportKind::ReliableDatagram),
            Network::MultiplexedStream => Some(TransportKind::MultiplexedStream),
            Network::Native(_) => None,
        }
    }
}

/// Resolve `address`, keeping only the family a `4`/`6` suffixed network asks for
pub async fn resolve_socket(network: &str, address: &str) -> io::Result<SocketAddr> {
    let wanted = |addr: &SocketAddr| {
        if network.ends_with('4') {
            addr.is_ipv4()
        } else if network.ends_with('6') {
            addr.is_ipv6()
        } else {
            true
        }
    };

    tokio::net::lookup_host(address)
        .await?
        .find(wanted)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {} address for {}", network, address),
            )
        })
}

#[cfg(test)]
mod duplex {
    use super::traits::TransportStream;
    use crate::addr::NativeAddr;
    use async_trait::async_trait;
    use std::io;
    use tokio::io::DuplexStream;

    #[async_trait]
    impl TransportStream for DuplexStream {
        async fn shutdown(&mut self) -> io::Result<()> {
            tokio::io::AsyncWriteExt::shutdown(self).await
        }

        fn local_addr(&self) -> NativeAddr {
            NativeAddr::Other("duplex".into())
        }

        fn peer_addr(&self) -> NativeAddr {
            NativeAddr::Other("duplex".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_substituted_names() {
        assert_eq!(Network::parse("kcp", None), Network::ReliableDatagram);
        assert_eq!(Network::parse("reliable-datagram", None), Network::ReliableDatagram);
        assert_eq!(Network::parse("quic", None), Network::MultiplexedStream);
        assert_eq!(Network::parse("multiplexed-stream", None), Network::MultiplexedStream);
    }

    #[test]
    fn test_parse_native_fallback() {
        assert_eq!(Network::parse("tcp", None), Network::Native("tcp".into()));
        assert_eq!(Network::parse("udp6", None), Network::Native("udp6".into()));
        assert_eq!(Network::parse("tcp", None).kind(), None);
    }

    #[test]
    fn test_parse_routed_tcp() {
        let kcp = Some(TransportKind::ReliableDatagram);
        assert_eq!(Network::parse("tcp", kcp), Network::ReliableDatagram);
        assert_eq!(Network::parse("udp", kcp), Network::Native("udp".into()));

        let quic = Some(TransportKind::MultiplexedStream);
        assert_eq!(Network::parse("tcp", quic), Network::MultiplexedStream);
        assert_eq!(Network::parse("udp", quic), Network::MultiplexedStream);
        assert_eq!(Network::parse("tcp4", quic), Network::Native("tcp4".into()));
    }

    #[tokio::test]
    async fn test_resolve_socket_family() {
        let v4 = resolve_socket("tcp4", "127.0.0.1:80").await.unwrap();
        assert!(v4.is_ipv4());

        let err = resolve_socket("tcp6", "127.0.0.1:80").await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AddrNotAvailable);
    }
}
