//! Session management for connected clients
//!
//! This module handles:
//! - Tracking every admitted connection
//! - Echoing client traffic back
//! - Closing idle sessions and all sessions on shutdown

mod connection;
mod manager;

pub use connection::{EchoSession, SessionHandle};
pub use manager::SessionManager;
