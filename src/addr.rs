//! Canonical address
//!
//! Each transport reports addresses in its own shape. They are captured once,
//! at the point they are first observed, as a [`NativeAddr`] and normalized
//! into a [`CanonicalAddress`] that exposes IP, port and zone uniformly.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};

/// Transport-native address shapes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeAddr {
    /// Stream-oriented socket address (TCP, TLS over TCP)
    Stream(SocketAddr),
    /// Datagram-oriented socket address (UDP, KCP, QUIC)
    Datagram(SocketAddr),
    /// Bare IP with an optional IPv6 zone
    Ip { ip: IpAddr, zone: Option<String> },
    /// Anything else, kept only for display
    Other(String),
}

impl NativeAddr {
    /// Placeholder for an address the transport does not expose
    pub fn unknown() -> Self {
        NativeAddr::Other(String::new())
    }

    /// Network family name of this address
    pub fn network(&self) -> &str {
        match self {
            NativeAddr::Stream(_) => "tcp",
            NativeAddr::Datagram(_) => "udp",
            NativeAddr::Ip { .. } => "ip",
            NativeAddr::Other(_) => "",
        }
    }
}

impl fmt::Display for NativeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeAddr::Stream(addr) | NativeAddr::Datagram(addr) => write!(f, "{}", addr),
            NativeAddr::Ip { ip, zone: Some(zone) } => write!(f, "{}%{}", ip, zone),
            NativeAddr::Ip { ip, zone: None } => write!(f, "{}", ip),
            NativeAddr::Other(label) => f.write_str(label),
        }
    }
}

/// Transport-agnostic address, immutable once derived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalAddress {
    ip: Option<IpAddr>,
    port: u16,
    zone: String,
    native: NativeAddr,
}

impl CanonicalAddress {
    /// Normalize a native address
    ///
    /// Unrecognized shapes yield no IP and port 0 but keep their textual form.
    pub fn normalize(native: NativeAddr) -> Self {
        let (ip, port, zone) = match &native {
            NativeAddr::Stream(addr) | NativeAddr::Datagram(addr) => {
                (Some(addr.ip()), addr.port(), socket_zone(addr))
            }
            NativeAddr::Ip { ip, zone } => (Some(*ip), 0, zone.clone().unwrap_or_default()),
            NativeAddr::Other(_) => (None, 0, String::new()),
        };

        Self {
            ip,
            port,
            zone,
            native,
        }
    }

    /// An address with nothing known about it
    pub fn empty() -> Self {
        Self::normalize(NativeAddr::unknown())
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// IPv6 scope zone, empty when there is none
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// The address this one was derived from
    pub fn native(&self) -> &NativeAddr {
        &self.native
    }

    pub fn network(&self) -> &str {
        self.native.network()
    }

    /// Socket address form, when the native shape had one
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self.native {
            NativeAddr::Stream(addr) | NativeAddr::Datagram(addr) => Some(addr),
            _ => None,
        }
    }
}

impl fmt::Display for CanonicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.native.fmt(f)
    }
}

impl From<NativeAddr> for CanonicalAddress {
    fn from(native: NativeAddr) -> Self {
        Self::normalize(native)
    }
}

fn socket_zone(addr: &SocketAddr) -> String {
    match addr {
        SocketAddr::V6(v6) if v6.scope_id() != 0 => v6.scope_id().to_string(),
        _ => String::new(),
    }
}

/// Anything a port number can be read from
pub trait PortSource {
    fn port(&self) -> u16;
}

impl PortSource for CanonicalAddress {
    fn port(&self) -> u16 {
        self.port
    }
}

impl PortSource for NativeAddr {
    fn port(&self) -> u16 {
        match self {
            NativeAddr::Stream(addr) | NativeAddr::Datagram(addr) => addr.port(),
            other => CanonicalAddress::normalize(other.clone()).port,
        }
    }
}

impl PortSource for SocketAddr {
    fn port(&self) -> u16 {
        SocketAddr::port(self)
    }
}

/// Extract the port from a native or already-normalized address
pub fn port_of<A: PortSource + ?Sized>(addr: &A) -> u16 {
    addr.port()
}

/// Resolve a textual address for the given network family
///
/// Unknown networks resolve to an empty address rather than an error.
pub async fn resolve(network: &str, address: &str) -> io::Result<CanonicalAddress> {
    let native = match network {
        "tcp" | "tcp4" | "tcp6" => NativeAddr::Stream(lookup(address).await?),
        "udp" | "udp4" | "udp6" => NativeAddr::Datagram(lookup(address).await?),
        "ip" | "ip4" | "ip6" => parse_ip(address)?,
        _ => NativeAddr::unknown(),
    };
    Ok(CanonicalAddress::normalize(native))
}

async fn lookup(address: &str) -> io::Result<SocketAddr> {
    tokio::net::lookup_host(address)
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no addresses for {}", address),
            )
        })
}

fn parse_ip(address: &str) -> io::Result<NativeAddr> {
    let (host, zone) = match address.split_once('%') {
        Some((host, zone)) => (host, Some(zone.to_string())),
        None => (address, None),
    };
    let ip = host
        .parse::<IpAddr>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    Ok(NativeAddr::Ip { ip, zone })
}

/// Replace an unspecified host with loopback so a listen address can be dialed
pub(crate) fn dialable(address: &str) -> String {
    address.replace("0.0.0.0", "127.0.0.1").replace("[::]", "[::1]")
}
