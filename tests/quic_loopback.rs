//! End-to-end QUIC admission over loopback

use gated_transport::{Magic, SelectorConfig, TransportError, TransportSelector};
use std::time::{Duration, Instant};

async fn quic_listener(selector: &TransportSelector) -> (gated_transport::Listener, String) {
    let listener = selector.listen("quic", "127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().to_string();
    (listener, address)
}

#[tokio::test]
async fn test_admitted_exchange_and_close() {
    let server = TransportSelector::default();
    let (mut listener, address) = quic_listener(&server).await;

    let client = TransportSelector::default();
    let dialed = tokio::spawn(async move {
        let conn = client.dial("quic", &address).await.unwrap();
        conn.write(b"PING\r\n").await.unwrap();

        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"PONG\r\n");

        let started = Instant::now();
        conn.close().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    });

    let conn = listener.accept().await.unwrap();
    assert!(conn.as_guarded().is_some());
    assert_eq!(conn.peer_addr().network(), "udp");

    let mut buf = [0u8; 16];
    let n = conn.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"PING\r\n");
    conn.write(b"PONG\r\n").await.unwrap();

    // Peer's close frame reads as end-of-stream
    assert_eq!(conn.read(&mut buf).await.unwrap(), 0);
    assert_eq!(conn.read(&mut buf).await.unwrap(), 0);

    dialed.await.unwrap();
}

#[tokio::test]
async fn test_wrong_magic_is_rejected() {
    let server = TransportSelector::default();
    let (mut listener, address) = quic_listener(&server).await;

    let client = TransportSelector::new(SelectorConfig {
        quic_magic: Magic::new(0x10),
        ..Default::default()
    });
    let _conn = client.dial("quic", &address).await.unwrap();

    let started = Instant::now();
    let err = listener.accept().await.unwrap_err();
    assert!(err.is_temporary(), "unexpected error: {}", err);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_routed_tcp_uses_quic() {
    let server = TransportSelector::new(SelectorConfig::quic());
    let mut listener = server.listen("tcp", "127.0.0.1:0").await.unwrap();
    assert_eq!(listener.local_addr().network(), "udp");
    let address = listener.local_addr().to_string();

    let client = TransportSelector::new(SelectorConfig::quic());
    let dialed = tokio::spawn(async move {
        let conn = client.dial("tcp", &address).await.unwrap();
        conn.write(b"hello").await.unwrap();
        conn
    });

    let conn = listener.accept().await.unwrap();
    let mut buf = [0u8; 8];
    let n = conn.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hello");

    let _client_conn = dialed.await.unwrap();
}

#[tokio::test]
async fn test_unspecified_listen_address_is_dialable() {
    let server = TransportSelector::default();
    let mut listener = server.listen("quic", "0.0.0.0:0").await.unwrap();
    let address = format!("0.0.0.0:{}", listener.local_addr().port());

    let client = TransportSelector::default();
    let dialed = tokio::spawn(async move { client.dial("quic", &address).await });

    assert!(listener.accept().await.is_ok());
    assert!(dialed.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_dial_timeout_against_silence() {
    let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let address = silent.local_addr().unwrap().to_string();

    let client = TransportSelector::default();
    let err = client
        .dial_timeout("quic", &address, Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_closed_listener() {
    let server = TransportSelector::default();
    let (mut listener, _) = quic_listener(&server).await;

    listener.close();
    assert!(matches!(
        listener.accept().await,
        Err(TransportError::ListenerClosed)
    ));
}
