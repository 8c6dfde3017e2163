//! Connection handshake behavior against a scripted remote peer.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use btclite::config::NetworkParams;
use btclite::error::{PeerError, ProtocolError};
use btclite::net::NetworkConnection;
use btclite::wire::{Message, PingMessage};
use common::MockPeer;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_handshake_exchanges_versions_then_checksums() {
    let mut mock = MockPeer::start_default(NetworkParams::mainnet(), 50_000).await;

    let conn = NetworkConnection::connect(
        &NetworkParams::mainnet(),
        mock.address,
        123,
        "/btclite-test/",
        TIMEOUT,
    )
    .await
    .unwrap();

    // Our version travels first and before any checksummed frame; the
    // mock parses it without a checksum or it would not be here.
    let first = mock.expect("our version", |m| matches!(m, Message::Version(_))).await;
    match first {
        Message::Version(v) => {
            assert_eq!(v.start_height, 123);
            assert_eq!(v.user_agent, "/btclite-test/");
        }
        _ => unreachable!(),
    }
    mock.expect("our verack", |m| matches!(m, Message::Verack)).await;

    // After observing the peer's 60002 the codec must checksum.
    assert!(conn.checksumming());
    assert_eq!(conn.best_height(), 50_000);
    assert_eq!(conn.peer_version().user_agent, "/mock:1.0/");
    assert!(conn.peer_version().has_blockchain());

    conn.shutdown().await;
}

#[tokio::test]
async fn test_chainless_peer_is_rejected() {
    let mock = MockPeer::start(NetworkParams::mainnet(), 0, 10).await;

    let result = NetworkConnection::connect(
        &NetworkParams::mainnet(),
        mock.address,
        0,
        "/btclite-test/",
        TIMEOUT,
    )
    .await;

    match result {
        Err(PeerError::Protocol(ProtocolError::ChainlessPeer)) => {}
        other => panic!("expected chainless rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_to_dead_port_fails_with_io_error() {
    // Bind-then-drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let result = NetworkConnection::connect(
        &NetworkParams::mainnet(),
        address,
        0,
        "/btclite-test/",
        Duration::from_secs(1),
    )
    .await;
    match result {
        Err(PeerError::Protocol(ProtocolError::Io(_))) => {}
        other => panic!("expected I/O failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_writers_do_not_interleave_frames() {
    let mut mock = MockPeer::start_default(NetworkParams::mainnet(), 0).await;
    let conn = Arc::new(
        NetworkConnection::connect(
            &NetworkParams::mainnet(),
            mock.address,
            0,
            "/btclite-test/",
            TIMEOUT,
        )
        .await
        .unwrap(),
    );

    let writers = 8u64;
    let pings_per_writer = 5u64;
    let mut tasks = Vec::new();
    for writer in 0..writers {
        let conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..pings_per_writer {
                let nonce = writer * 1000 + i;
                conn.write_message(&Message::Ping(PingMessage { nonce: Some(nonce) }))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Every frame must arrive intact and parseable; collect the nonces
    // and check nothing was torn or lost.
    let mut nonces = HashSet::new();
    for _ in 0..writers * pings_per_writer {
        let msg = mock.expect("ping", |m| matches!(m, Message::Ping(_))).await;
        if let Message::Ping(ping) = msg {
            nonces.insert(ping.nonce.unwrap());
        }
    }
    let expected: HashSet<u64> = (0..writers)
        .flat_map(|w| (0..pings_per_writer).map(move |i| w * 1000 + i))
        .collect();
    assert_eq!(nonces, expected);

    conn.shutdown().await;
}

#[tokio::test]
async fn test_read_after_peer_death_fails() {
    let mock = MockPeer::start_default(NetworkParams::mainnet(), 0).await;
    let conn = NetworkConnection::connect(
        &NetworkParams::mainnet(),
        mock.address,
        0,
        "/btclite-test/",
        TIMEOUT,
    )
    .await
    .unwrap();

    mock.kill();
    let result = tokio::time::timeout(TIMEOUT, conn.read_message()).await;
    match result {
        Ok(Err(PeerError::Protocol(ProtocolError::Io(_)))) => {}
        other => panic!("expected I/O failure after peer death, got {other:?}"),
    }

    // Shutdown stays idempotent afterwards.
    conn.shutdown().await;
    conn.shutdown().await;
}
