//! Admission token and in-band control frames
//!
//! A gated connection carries two kinds of protocol bytes inside the payload
//! stream:
//! ```text
//! admission:      [ 1 byte: magic ]                       (dialer -> listener, once)
//! control frame:  [ 1 byte: magic ][ 1 byte: action ]     (either side, any time)
//! ```
//!
//! Control frames are only recognized when they are the first two bytes
//! delivered by a single read. A frame that arrives split across reads, or
//! behind payload in the same read, is passed through as payload.

use std::fmt;
use thiserror::Error;

/// Length of an encoded control frame
pub const FRAME_LEN: usize = 2;

/// Errors that can occur while decoding admission tokens and control frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Control frame too short: {0} bytes (need {FRAME_LEN})")]
    TooShort(usize),

    #[error("Magic mismatch: expected {expected}, found 0x{found:02x}")]
    MagicMismatch { expected: Magic, found: u8 },

    #[error("Unknown control action: 0x{0:02x}")]
    UnknownAction(u8),
}

/// Per-transport constant used as admission token and control frame prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Magic(u8);

impl Magic {
    pub const fn new(byte: u8) -> Self {
        Self(byte)
    }

    pub const fn byte(self) -> u8 {
        self.0
    }

    /// The admission token a dialer writes right after connecting
    pub const fn token(self) -> [u8; 1] {
        [self.0]
    }

    /// Verify a received admission token
    pub fn check_token(self, received: u8) -> Result<(), WireError> {
        if received == self.0 {
            Ok(())
        } else {
            Err(WireError::MagicMismatch {
                expected: self,
                found: received,
            })
        }
    }
}

impl From<u8> for Magic {
    fn from(byte: u8) -> Self {
        Self(byte)
    }
}

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Control actions carried in the second byte of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    /// Sender is shutting the connection down
    Close = b'c',
    /// Keep-alive marker, carries no payload
    Heartbeat = b'h',
}

impl TryFrom<u8> for Action {
    type Error = WireError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'c' => Ok(Action::Close),
            b'h' => Ok(Action::Heartbeat),
            other => Err(WireError::UnknownAction(other)),
        }
    }
}

/// A decoded control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFrame {
    pub magic: Magic,
    pub action: Action,
}

impl ControlFrame {
    pub fn close(magic: Magic) -> Self {
        Self {
            magic,
            action: Action::Close,
        }
    }

    pub fn heartbeat(magic: Magic) -> Self {
        Self {
            magic,
            action: Action::Heartbeat,
        }
    }

    /// Encode into the two wire bytes
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        [self.magic.byte(), self.action as u8]
    }

    /// Strictly decode a frame from the start of `buf`
    pub fn decode(magic: Magic, buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < FRAME_LEN {
            return Err(WireError::TooShort(buf.len()));
        }
        magic.check_token(buf[0])?;
        let action = Action::try_from(buf[1])?;
        Ok(Self { magic, action })
    }
}

/// How a single read should be surfaced to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Ordinary bytes
    Payload,
    /// Peer sent a close frame; report end-of-stream
    Close,
    /// A standalone heartbeat frame; nothing to deliver
    Heartbeat,
}

/// Classify the bytes returned by one read
///
/// A heartbeat is only swallowed when the read consists of exactly the frame,
/// since anything longer cannot be told apart from payload that happens to
/// start with the same two bytes.
pub fn classify(magic: Magic, read: &[u8]) -> Inbound {
    match ControlFrame::decode(magic, read) {
        Ok(frame) => match frame.action {
            Action::Close => Inbound::Close,
            Action::Heartbeat if read.len() == FRAME_LEN => Inbound::Heartbeat,
            Action::Heartbeat => Inbound::Payload,
        },
        Err(_) => Inbound::Payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: Magic = Magic::new(0x10);

    #[test]
    fn test_close_frame_bytes() {
        assert_eq!(ControlFrame::close(MAGIC).encode(), [0x10, b'c']);
        assert_eq!(ControlFrame::heartbeat(MAGIC).encode(), [0x10, b'h']);
    }

    #[test]
    fn test_decode_frame() {
        let frame = ControlFrame::decode(MAGIC, &[0x10, b'c', 0xff]).expect("decode failed");
        assert_eq!(frame.action, Action::Close);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            ControlFrame::decode(MAGIC, &[0x10]),
            Err(WireError::TooShort(1))
        );
        assert!(matches!(
            ControlFrame::decode(MAGIC, &[0x74, b'c']),
            Err(WireError::MagicMismatch { found: 0x74, .. })
        ));
        assert_eq!(
            ControlFrame::decode(MAGIC, &[0x10, b'x']),
            Err(WireError::UnknownAction(b'x'))
        );
    }

    #[test]
    fn test_check_token() {
        assert!(MAGIC.check_token(0x10).is_ok());
        let err = MAGIC.check_token(0x74).unwrap_err();
        assert_eq!(err.to_string(), "Magic mismatch: expected 0x10, found 0x74");
    }

    #[test]
    fn test_classify_close_with_trailing_bytes() {
        // Close is honoured even when the read carries more than the frame
        assert_eq!(classify(MAGIC, &[0x10, b'c', 0, 0, 0]), Inbound::Close);
    }

    #[test]
    fn test_classify_heartbeat() {
        assert_eq!(classify(MAGIC, &[0x10, b'h']), Inbound::Heartbeat);
        assert_eq!(classify(MAGIC, &[0x10, b'h', b'!']), Inbound::Payload);
    }

    #[test]
    fn test_classify_payload() {
        assert_eq!(classify(MAGIC, b"PING\r\n"), Inbound::Payload);
        assert_eq!(classify(MAGIC, &[0x10]), Inbound::Payload);
        assert_eq!(classify(MAGIC, &[0x74, b'c']), Inbound::Payload);
        // Frame at an offset is not detected
        assert_eq!(classify(MAGIC, &[b'x', 0x10, b'c']), Inbound::Payload);
    }
}
