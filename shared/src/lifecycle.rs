//! Connection lifecycle state machine
//!
//! Defines valid transitions while a gated connection shuts down. The state is
//! held in an atomic so every handle to a connection observes the same value
//! without taking a lock.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle states of a gated connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    /// Reads and writes flow normally
    Open = 0,
    /// Peer sent a close frame; reads report end-of-stream, writes still allowed
    PeerClosed = 1,
    /// Local close started; no further application writes
    Closing = 2,
    /// Underlying stream has been shut down
    Closed = 3,
}

impl LinkState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LinkState::Open,
            1 => LinkState::PeerClosed,
            2 => LinkState::Closing,
            _ => LinkState::Closed,
        }
    }

    /// Whether application writes are still permitted
    pub fn accepts_writes(self) -> bool {
        matches!(self, LinkState::Open | LinkState::PeerClosed)
    }

    /// Whether reads must report end-of-stream without touching the stream
    pub fn read_finished(self) -> bool {
        matches!(self, LinkState::PeerClosed | LinkState::Closed)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A close control frame was read from the peer
    PeerCloseFrame,
    /// First local call to close
    CloseStarted,
    /// Grace period over and the stream is shut down
    CloseFinished,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed (or stayed put)
    Success(LinkState),
    /// Transition was invalid from current state
    Invalid { from: LinkState, event: LinkEvent },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success(_))
    }
}

/// Shared lifecycle of one connection
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Create a lifecycle in the Open state
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LinkState::Open as u8),
        }
    }

    /// Get current state
    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Process an event and return the transition result
    pub fn process_event(&self, event: LinkEvent) -> TransitionResult {
        let mut current = self.state.load(Ordering::Acquire);

        loop {
            let from = LinkState::from_u8(current);
            let Some(to) = next_state(from, event) else {
                return TransitionResult::Invalid { from, event };
            };
            debug_assert!(is_valid_transition(from, to));

            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return TransitionResult::Success(to),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Get the next state for a given event, if the transition is valid
fn next_state(from: LinkState, event: LinkEvent) -> Option<LinkState> {
    use LinkEvent::*;
    use LinkState::*;

    match (from, event) {
        (Open | PeerClosed, PeerCloseFrame) => Some(PeerClosed),
        // A late close frame changes nothing once we are shutting down
        (Closing, PeerCloseFrame) => Some(Closing),

        (Open | PeerClosed, CloseStarted) => Some(Closing),
        (Closing, CloseFinished) => Some(Closed),

        _ => None,
    }
}

/// Check if a transition from one state to another is generally valid
pub fn is_valid_transition(from: LinkState, to: LinkState) -> bool {
    use LinkState::*;

    match (from, to) {
        (a, b) if a == b => true,
        (Open, PeerClosed) => true,
        (Open | PeerClosed, Closing) => true,
        (Closing, Closed) => true,
        _ => false,
    }
}
