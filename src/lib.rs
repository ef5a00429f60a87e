//! Admission-gated KCP and QUIC transports
//!
//! A [`TransportSelector`] stands in for a messaging client's network dialer.
//! Requests for the reliable-datagram (KCP) or multiplexed-stream (QUIC)
//! networks are dialed or accepted through a one-byte admission handshake
//! and handed back as [`GuardedConnection`]s, which carry an in-band close
//! signal and heartbeat marker, enforce deadlines, and close exactly once.
//! Any other network name goes to the native TCP/UDP/TLS stack unmodified.

pub mod addr;
pub mod admission;
pub mod config;
pub mod connection;
pub mod error;
pub mod selector;
pub mod tls;
pub mod transport;

pub use addr::{port_of, resolve, CanonicalAddress, NativeAddr, PortSource};
pub use admission::{AdmissionDialer, AdmissionPolicy, HandshakeGate};
pub use config::{SelectorConfig, TransportKind};
pub use connection::{Connection, GuardedConnection, PlainConnection};
pub use error::TransportError;
pub use selector::{Listener, NativeListener, TransportSelector};
pub use tls::{TlsContext, TlsProvider};
pub use transport::Network;

pub use gated_wire::{magic, timing, Magic};
