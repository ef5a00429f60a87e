//! One-byte admission handshake
//!
//! The dialer writes the transport's magic byte as soon as the raw connection
//! is up; the listener reads it within a short deadline and turns away any
//! peer that does not present it.

mod dialer;
mod gate;

pub use dialer::{send_token, AdmissionDialer};
pub use gate::{handshake, AdmissionPolicy, HandshakeGate};
