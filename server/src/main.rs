mod session;

use anyhow::{Context, Result};
use clap::Parser;
use gated_transport::{Connection, SelectorConfig, TransportSelector};
use session::{EchoSession, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Sessions quiet for this long are closed
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "gated-server")]
#[command(about = "Echo server behind a gated listener", long_about = None)]
struct Args {
    /// Network name: quic, kcp, or a native network such as tcp
    #[arg(default_value = "quic")]
    network: String,

    /// Address to listen on
    #[arg(default_value = "0.0.0.0:4222")]
    address: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let Args { network, address } = Args::parse();

    let selector = TransportSelector::new(SelectorConfig::default());
    let mut listener = selector
        .listen(&network, &address)
        .await
        .with_context(|| format!("Failed to listen on {} {}", network, address))?;
    info!("Echo server listening on {} {}", network, listener.local_addr());

    let sessions = Arc::new(SessionManager::new());

    let sweeper = sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = sweeper.remove_idle_sessions(IDLE_TIMEOUT).await;
            if !removed.is_empty() {
                info!("Closed {} idle sessions", removed.len());
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => spawn_session(conn, sessions.clone()),
                Err(e) if e.is_temporary() => warn!("{}", e),
                Err(e) => {
                    error!("Listener failed: {}", e);
                    break;
                }
            }
        }
    }

    listener.close();
    let peers = sessions.peers().await;
    if !peers.is_empty() {
        info!("Closing {} sessions", peers.len());
    }
    sessions.close_all().await;
    Ok(())
}

fn spawn_session(conn: Connection, sessions: Arc<SessionManager>) {
    let mut session = EchoSession::new(sessions.next_id(), conn);
    let handle = session.get_handle();

    tokio::spawn(async move {
        sessions.register(handle.clone()).await;
        info!(
            "Session {} from {} ({} active)",
            handle.id,
            handle.peer,
            sessions.count().await
        );

        match session.run().await {
            Ok(echoed) => info!(
                "Session {} ended after {:?}, {} bytes echoed",
                handle.id,
                handle.connected_at.elapsed(),
                echoed
            ),
            Err(e) => warn!("Session {} failed: {}", handle.id, e),
        }

        let _ = handle.close().await;
        sessions.unregister(handle.id).await;
    });
}
