//! Session manager for tracking all connected clients

use super::connection::SessionHandle;
use gated_transport::CanonicalAddress;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Manages all active sessions
pub struct SessionManager {
    /// Map of session id -> session handle
    sessions: Arc<RwLock<HashMap<u64, SessionHandle>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id for a new session
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a new session
    pub async fn register(&self, handle: SessionHandle) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(handle.id, handle);
    }

    /// Unregister a session
    pub async fn unregister(&self, id: u64) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
    }

    /// Peers of all connected clients
    pub async fn peers(&self) -> Vec<CanonicalAddress> {
        let sessions = self.sessions.read().await;
        sessions.values().map(|h| h.peer.clone()).collect()
    }

    /// Close and remove sessions idle for longer than `idle`
    pub async fn remove_idle_sessions(&self, idle: Duration) -> Vec<u64> {
        let handles: Vec<SessionHandle> = {
            let sessions = self.sessions.read().await;
            sessions.values().cloned().collect()
        };

        let mut removed = Vec::new();
        for handle in handles {
            if handle.idle_for().await > idle {
                debug!("Session {} ({}) idle, closing", handle.id, handle.peer);
                let _ = handle.close().await;
                self.unregister(handle.id).await;
                removed.push(handle.id);
            }
        }
        removed
    }

    /// Close every session concurrently and wait for all of them
    pub async fn close_all(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, h)| h).collect()
        };

        let closing: Vec<_> = handles
            .into_iter()
            .map(|handle| tokio::spawn(async move { handle.close().await }))
            .collect();
        for task in closing {
            if let Ok(Err(e)) = task.await {
                debug!("Close during shutdown failed: {}", e);
            }
        }
    }

    /// Get the number of connected clients
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
