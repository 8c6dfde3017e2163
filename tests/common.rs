//! Shared test fixtures: an in-process mock peer speaking the wire
//! protocol, a no-op block chain, and event-recording listeners.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use btclite::chain::{BlockChain, StoredBlock};
use btclite::config::NetworkParams;
use btclite::error::VerificationError;
use btclite::net::PeerEventListener;
use btclite::wire::messages::NODE_NETWORK;
use btclite::wire::{Block, Message, MessageCodec, PeerAddress, VersionMessage};

/// A scripted remote peer. Accepts connections, answers the version
/// handshake, then forwards every inbound message to the test.
pub struct MockPeer {
    pub address: SocketAddr,
    pub received: mpsc::UnboundedReceiver<Message>,
    kill: CancellationToken,
}

impl MockPeer {
    pub async fn start(params: NetworkParams, services: u64, start_height: u32) -> MockPeer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let kill = CancellationToken::new();

        let token = kill.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = tokio::select! {
                    _ = token.cancelled() => return,
                    accepted = listener.accept() => match accepted {
                        Ok(conn) => conn,
                        Err(_) => return,
                    },
                };
                serve_connection(stream, &params, services, start_height, &msg_tx, &token).await;
                if token.is_cancelled() {
                    return;
                }
            }
        });

        MockPeer {
            address,
            received: msg_rx,
            kill,
        }
    }

    /// A well-behaved chain-carrying peer.
    pub async fn start_default(params: NetworkParams, start_height: u32) -> MockPeer {
        Self::start(params, NODE_NETWORK, start_height).await
    }

    /// Drop the current connection and stop accepting new ones.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Wait for the next message matching `pred`, skipping others.
    pub async fn expect<F>(&mut self, what: &str, pred: F) -> Message
    where
        F: Fn(&Message) -> bool,
    {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), self.received.recv()).await {
                Ok(Some(msg)) if pred(&msg) => return msg,
                Ok(Some(_)) => {}
                Ok(None) => panic!("mock peer channel closed while waiting for {what}"),
                Err(_) => panic!("timed out waiting for {what}"),
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    params: &NetworkParams,
    services: u64,
    start_height: u32,
    msg_tx: &mpsc::UnboundedSender<Message>,
    kill: &CancellationToken,
) {
    let (mut reader, mut writer) = stream.into_split();
    let codec = MessageCodec::new(params);
    codec.set_checksumming(false);

    // The client speaks first; its version arrives unchecksummed.
    let Ok(their_version) = codec.read_message(&mut reader).await else {
        return;
    };
    let Message::Version(their_version) = their_version else {
        return;
    };
    let _ = msg_tx.send(Message::Version(their_version.clone()));

    let our_version = Message::Version(VersionMessage {
        version: 60002,
        services,
        timestamp: 1_700_000_000,
        addr_recv: PeerAddress::unspecified(),
        addr_from: PeerAddress::unspecified(),
        nonce: 1,
        user_agent: "/mock:1.0/".to_string(),
        start_height,
    });
    if codec.write_message(&mut writer, &our_version).await.is_err() {
        return;
    }

    // Both sides are now past their version messages.
    codec.set_checksumming(true);

    match codec.read_message(&mut reader).await {
        Ok(msg @ Message::Verack) => {
            let _ = msg_tx.send(msg);
        }
        _ => return,
    }
    if codec
        .write_message(&mut writer, &Message::Verack)
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            _ = kill.cancelled() => return,
            read = codec.read_message(&mut reader) => match read {
                Ok(msg) => {
                    let _ = msg_tx.send(msg);
                }
                Err(_) => return,
            }
        }
    }
}

/// Block chain that accepts everything and stays at genesis.
pub struct NoopChain {
    head: StoredBlock,
}

impl NoopChain {
    pub fn new(params: &NetworkParams) -> Self {
        NoopChain {
            head: StoredBlock {
                hash: params.genesis_hash,
                height: 0,
                chain_work: Default::default(),
            },
        }
    }
}

impl BlockChain for NoopChain {
    fn add(&self, _block: Block) -> Result<bool, VerificationError> {
        Ok(true)
    }

    fn chain_head(&self) -> StoredBlock {
        self.head.clone()
    }
}

/// Listener that records pool lifecycle events.
#[derive(Default)]
pub struct RecordingListener {
    pub connected: Mutex<Vec<usize>>,
    pub disconnected: Mutex<Vec<usize>>,
    pub downloads_started: Mutex<Vec<(PeerAddress, u32)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl PeerEventListener for RecordingListener {
    fn peer_connected(&self, peer_count: usize) {
        self.connected.lock().unwrap().push(peer_count);
    }

    fn peer_disconnected(&self, peer_count: usize) {
        self.disconnected.lock().unwrap().push(peer_count);
    }

    fn chain_download_started(&self, peer: &PeerAddress, blocks_left: u32) {
        self.downloads_started
            .lock()
            .unwrap()
            .push((peer.clone(), blocks_left));
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_for<F: FnMut() -> bool>(mut cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
