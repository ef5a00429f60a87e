//! Admission dialer: connect, then present the magic byte

use crate::connection::GuardedConnection;
use crate::error::TransportError;
use crate::transport::{BoxedStream, TransportConnector};
use gated_wire::Magic;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Write the admission token and flush it
pub async fn send_token(stream: &mut BoxedStream, magic: Magic) -> io::Result<()> {
    stream.write_all(&magic.token()).await?;
    stream.flush().await
}

/// Dials one transport and performs the dialer side of admission
pub struct AdmissionDialer {
    connector: Box<dyn TransportConnector>,
    magic: Magic,
    close_grace: Duration,
}

impl AdmissionDialer {
    pub fn new(connector: Box<dyn TransportConnector>, magic: Magic, close_grace: Duration) -> Self {
        Self {
            connector,
            magic,
            close_grace,
        }
    }

    /// Connect to `target` and hand back a guarded connection
    ///
    /// A failed token write drops the raw stream; there is no retry.
    pub async fn dial(&self, target: SocketAddr) -> Result<GuardedConnection, TransportError> {
        debug!("Dialing {} via {}", target, self.connector.name());

        let mut stream = self
            .connector
            .connect(target)
            .await
            .map_err(|e| TransportError::dial(target, e))?;

        send_token(&mut stream, self.magic)
            .await
            .map_err(|e| TransportError::dial(target, e))?;

        Ok(GuardedConnection::new(stream, self.magic, self.close_grace))
    }

    pub fn name(&self) -> &'static str {
        self.connector.name()
    }
}
