//! Gated transport wire vocabulary
//!
//! This crate holds everything both ends of a gated connection have to agree
//! on: the per-transport magic numbers, the in-band control frames that share
//! the payload stream, the fixed admission and close timings, and the
//! lifecycle state machine a connection walks through while closing.

pub mod codec;
pub mod lifecycle;

pub use codec::{Action, ControlFrame, Inbound, Magic, WireError, FRAME_LEN};
pub use lifecycle::{Lifecycle, LinkEvent, LinkState, TransitionResult};

/// Default magic numbers, one per transport family
///
/// Dialer and listener of the same transport must use the same value. The two
/// families are deliberately independent.
pub mod magic {
    use crate::Magic;

    /// Admission token for the reliable-datagram (KCP) transport
    pub const RELIABLE_DATAGRAM: Magic = Magic::new(0x10);

    /// Admission token for the multiplexed-stream (QUIC) transport
    pub const MULTIPLEXED_STREAM: Magic = Magic::new(0x74);
}

/// Timing parameters of the admission and close protocol
pub mod timing {
    /// How long the listener waits for the admission token
    pub const HANDSHAKE_TIMEOUT_MS: u64 = 200;

    /// Pause between writing the close frame and tearing the stream down
    pub const CLOSE_GRACE_MS: u64 = 300;

    /// Upper bound for a QUIC connection + first stream to be established
    pub const QUIC_HANDSHAKE_TIMEOUT_MS: u64 = 2000;
}
