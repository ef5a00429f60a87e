//! gated-ping: dial a gated listener and measure round trips

use anyhow::{bail, Context, Result};
use clap::Parser;
use gated_transport::{Connection, SelectorConfig, TransportSelector};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "gated-ping")]
#[command(about = "Dial a gated listener and measure round trips", long_about = None)]
struct Args {
    /// Network name: quic, kcp, or a native network such as tcp
    #[arg(default_value = "quic")]
    network: String,

    /// Listener address
    #[arg(default_value = "127.0.0.1:4222")]
    address: String,

    /// Number of probes to send
    #[arg(default_value_t = 5)]
    count: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let Args {
        network,
        address,
        count,
    } = Args::parse();

    let selector = TransportSelector::new(SelectorConfig::default());
    let conn = selector
        .dial_timeout(&network, &address, DIAL_TIMEOUT)
        .await
        .with_context(|| format!("Failed to dial {} {}", network, address))?;

    info!(
        "Connected via {}: {} -> {}",
        network,
        conn.local_addr(),
        conn.peer_addr()
    );

    let result = ping_loop(&conn, count).await;
    conn.close().await.context("Close failed")?;
    result
}

async fn ping_loop(conn: &Connection, count: u32) -> Result<()> {
    let mut buf = [0u8; 64];
    let mut total = Duration::ZERO;

    for seq in 1..=count {
        let probe = format!("PING {}\r\n", seq);
        let sent = Instant::now();
        conn.write(probe.as_bytes()).await?;

        let mut received = 0;
        while received < probe.len() {
            let n = conn.read(&mut buf[received..]).await?;
            if n == 0 {
                bail!("Peer closed after {} of {} probes", seq - 1, count);
            }
            received += n;
        }

        let rtt = sent.elapsed();
        total += rtt;
        if &buf[..received] == probe.as_bytes() {
            info!("seq={} rtt={:?}", seq, rtt);
        } else {
            warn!("seq={} rtt={:?} unexpected echo", seq, rtt);
        }

        // Heartbeat mid-interval so it never shares a read with a ping
        tokio::time::sleep(PING_INTERVAL / 2).await;
        if let Some(guarded) = conn.as_guarded() {
            guarded.send_heartbeat().await?;
        }
        tokio::time::sleep(PING_INTERVAL / 2).await;
    }

    if count > 0 {
        info!("{} probes, mean rtt {:?}", count, total / count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults_and_positionals() {
        let args = Args::try_parse_from(["gated-ping"]).unwrap();
        assert_eq!(args.network, "quic");
        assert_eq!(args.address, "127.0.0.1:4222");
        assert_eq!(args.count, 5);

        let args = Args::try_parse_from(["gated-ping", "kcp", "10.0.0.7:4222", "3"]).unwrap();
        assert_eq!(args.network, "kcp");
        assert_eq!(args.address, "10.0.0.7:4222");
        assert_eq!(args.count, 3);

        assert!(Args::try_parse_from(["gated-ping", "kcp", "10.0.0.7:4222", "many"]).is_err());
    }

    #[tokio::test]
    async fn test_ping_loop_stays_in_step_with_heartbeats() {
        let server = TransportSelector::default();
        let mut listener = server.listen("quic", "127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().to_string();

        let echo = tokio::spawn(async move {
            let conn = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            loop {
                let n = conn.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                // Heartbeats are swallowed by the guarded read
                assert_ne!(buf[0], 0x74, "heartbeat leaked into payload");
                conn.write(&buf[..n]).await.unwrap();
            }
        });

        let client = TransportSelector::default();
        let conn = client.dial("quic", &address).await.unwrap();
        ping_loop(&conn, 3).await.unwrap();
        conn.close().await.unwrap();
        echo.await.unwrap();
    }
}
