//! Selector configuration

use gated_wire::{magic, timing, Magic};
use std::time::Duration;

/// Transports the selector can substitute for the native dialer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// KCP over UDP
    ReliableDatagram,
    /// A single bidirectional QUIC stream per connection
    MultiplexedStream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::ReliableDatagram => write!(f, "reliable-datagram"),
            TransportKind::MultiplexedStream => write!(f, "multiplexed-stream"),
        }
    }
}

/// Configuration for a transport selector
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Admission token and control prefix for KCP connections
    pub kcp_magic: Magic,
    /// Admission token and control prefix for QUIC connections
    pub quic_magic: Magic,
    /// Bound on the listener-side admission read
    pub handshake_timeout: Duration,
    /// Pause between the close frame and stream teardown
    pub close_grace: Duration,
    /// Bound on QUIC connection + first stream establishment
    pub quic_handshake_timeout: Duration,
    /// ALPN identifiers for the QUIC TLS handshake
    pub alpn: Vec<String>,
    /// Send plain "tcp" requests (and "udp" for QUIC) to this transport
    pub route_tcp_to: Option<TransportKind>,
    /// KCP session tuning
    #[cfg(feature = "kcp")]
    pub kcp: tokio_kcp::KcpConfig,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            kcp_magic: magic::RELIABLE_DATAGRAM,
            quic_magic: magic::MULTIPLEXED_STREAM,
            handshake_timeout: Duration::from_millis(timing::HANDSHAKE_TIMEOUT_MS),
            close_grace: Duration::from_millis(timing::CLOSE_GRACE_MS),
            quic_handshake_timeout: Duration::from_millis(timing::QUIC_HANDSHAKE_TIMEOUT_MS),
            alpn: vec!["quic".into()],
            route_tcp_to: None,
            #[cfg(feature = "kcp")]
            kcp: tokio_kcp::KcpConfig::default(),
        }
    }
}

impl SelectorConfig {
    /// Route a messaging client's "tcp" dials over KCP
    pub fn kcp() -> Self {
        Self {
            route_tcp_to: Some(TransportKind::ReliableDatagram),
            ..Default::default()
        }
    }

    /// Route a messaging client's "tcp" dials over QUIC
    pub fn quic() -> Self {
        Self {
            route_tcp_to: Some(TransportKind::MultiplexedStream),
            ..Default::default()
        }
    }

    /// Magic number agreed for a transport
    pub fn magic_for(&self, kind: TransportKind) -> Magic {
        match kind {
            TransportKind::ReliableDatagram => self.kcp_magic,
            TransportKind::MultiplexedStream => self.quic_magic,
        }
    }

    pub(crate) fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        self.alpn.iter().map(|p| p.as_bytes().to_vec()).collect()
    }
}
