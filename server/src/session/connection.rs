//! Individual client session handling

use gated_transport::{CanonicalAddress, Connection, TransportError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const READ_BUF_SIZE: usize = 4096;

/// Handle to one connected client
#[derive(Clone)]
pub struct SessionHandle {
    pub id: u64,
    pub peer: CanonicalAddress,
    pub connected_at: Instant,
    conn: Connection,
    last_activity: Arc<Mutex<Instant>>,
}

impl SessionHandle {
    /// Send raw bytes to this client
    pub async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.conn.write(bytes).await?;
        Ok(())
    }

    /// Close the client's connection; its session loop then ends
    pub async fn close(&self) -> Result<(), TransportError> {
        self.conn.close().await
    }

    /// Record traffic from the client
    pub async fn touch(&self) {
        *self.last_activity.lock().await = Instant::now();
    }

    /// Time since the client last sent anything
    pub async fn idle_for(&self) -> Duration {
        self.last_activity.lock().await.elapsed()
    }
}

/// Active echo session
pub struct EchoSession {
    pub handle: SessionHandle,
    read_buf: Vec<u8>,
}

impl EchoSession {
    pub fn new(id: u64, conn: Connection) -> Self {
        let now = Instant::now();
        let handle = SessionHandle {
            id,
            peer: conn.peer_addr().clone(),
            connected_at: now,
            conn,
            last_activity: Arc::new(Mutex::new(now)),
        };

        Self {
            handle,
            read_buf: vec![0u8; READ_BUF_SIZE],
        }
    }

    /// Get a cloneable handle for sending and closing
    pub fn get_handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Echo everything back until the client goes away
    ///
    /// Returns the number of bytes echoed.
    pub async fn run(&mut self) -> Result<u64, TransportError> {
        let mut echoed = 0u64;
        loop {
            let n = self.handle.conn.read(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(echoed);
            }
            self.handle.touch().await;
            self.handle.send(&self.read_buf[..n]).await?;
            echoed += n as u64;
        }
    }
}
