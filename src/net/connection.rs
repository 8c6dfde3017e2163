//! Peer connection
//!
//! One TCP session to one peer: connect with a timeout, run the
//! four-message version handshake, then exchange framed messages.
//! Writes from any number of tasks are serialized through the write
//! mutex so frames never interleave on the wire.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{NetworkParams, MIN_CHECKSUM_VERSION};
use crate::error::{PeerError, ProtocolError};
use crate::wire::messages::{Message, PeerAddress, VersionMessage};
use crate::wire::MessageCodec;

/// An established, handshaken session with one peer.
#[derive(Debug)]
pub struct NetworkConnection {
    address: SocketAddr,
    codec: MessageCodec,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer_version: VersionMessage,
    io_timeout: Duration,
    closed: AtomicBool,
}

impl NetworkConnection {
    /// Connect and handshake.
    ///
    /// Sends our version, reads the peer's version, then exchanges
    /// veracks. The version exchange runs without checksums; once the
    /// peer's advertised protocol version is known and is at least 209,
    /// all subsequent traffic is checksummed. A peer that does not
    /// advertise a copy of the block chain is rejected.
    pub async fn connect(
        params: &NetworkParams,
        address: SocketAddr,
        best_height: u32,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, PeerError> {
        debug!(%address, "connecting");
        let stream = io_timeout(timeout, TcpStream::connect(address)).await??;
        stream.set_nodelay(true).ok();
        let (mut read_half, mut write_half) = stream.into_split();

        let codec = MessageCodec::new(params);
        codec.set_checksumming(false);

        let our_version = Message::Version(VersionMessage {
            version: params.protocol_version,
            services: 0,
            timestamp: unix_time(),
            addr_recv: PeerAddress::new(address, 0),
            addr_from: PeerAddress::unspecified(),
            nonce: rand::random(),
            user_agent: user_agent.to_string(),
            start_height: best_height,
        });
        io_timeout(timeout, codec.write_message(&mut write_half, &our_version)).await??;

        let peer_version =
            match io_timeout(timeout, codec.read_message(&mut read_half)).await?? {
                Message::Version(version) => version,
                other => {
                    return Err(ProtocolError::UnexpectedHandshakeMessage {
                        expected: "version",
                        got: other.command().to_string(),
                    }
                    .into())
                }
            };

        if !peer_version.has_blockchain() {
            let _ = write_half.shutdown().await;
            return Err(ProtocolError::ChainlessPeer.into());
        }

        // The peer's version decides the framing for everything after
        // the version messages, our verack included.
        codec.set_checksumming(peer_version.version >= MIN_CHECKSUM_VERSION);

        io_timeout(timeout, codec.write_message(&mut write_half, &Message::Verack)).await??;
        match io_timeout(timeout, codec.read_message(&mut read_half)).await?? {
            Message::Verack => {}
            other => {
                return Err(ProtocolError::UnexpectedHandshakeMessage {
                    expected: "verack",
                    got: other.command().to_string(),
                }
                .into())
            }
        }

        info!(
            %address,
            version = peer_version.version,
            height = peer_version.start_height,
            agent = %peer_version.user_agent,
            "connected"
        );

        Ok(NetworkConnection {
            address,
            codec,
            reader: Mutex::new(read_half),
            writer: Mutex::new(write_half),
            peer_version,
            io_timeout: timeout,
            closed: AtomicBool::new(false),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The version message the peer introduced itself with.
    pub fn peer_version(&self) -> &VersionMessage {
        &self.peer_version
    }

    /// The peer's chain height at handshake time.
    pub fn best_height(&self) -> u32 {
        self.peer_version.start_height
    }

    pub fn checksumming(&self) -> bool {
        self.codec.checksumming()
    }

    /// Read the next message. Blocks until a message arrives, the peer
    /// hangs up, or the frame is invalid.
    pub async fn read_message(&self) -> Result<Message, PeerError> {
        let mut reader = self.reader.lock().await;
        Ok(self.codec.read_message(&mut *reader).await?)
    }

    /// Write one message. Concurrent writers queue on the connection's
    /// write mutex, keeping each frame contiguous.
    pub async fn write_message(&self, msg: &Message) -> Result<(), PeerError> {
        let mut writer = self.writer.lock().await;
        io_timeout(self.io_timeout, self.codec.write_message(&mut *writer, msg)).await??;
        Ok(())
    }

    /// Half-close then drop the socket. Safe to call repeatedly and
    /// from any task.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        debug!(address = %self.address, "connection shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn io_timeout<T>(
    duration: Duration,
    future: impl std::future::Future<Output = T>,
) -> Result<T, PeerError> {
    match tokio::time::timeout(duration, future).await {
        Ok(value) => Ok(value),
        Err(_) => Err(PeerError::Protocol(ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "peer I/O timed out",
        )))),
    }
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
