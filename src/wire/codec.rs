//! Message framing codec
//!
//! Reads and writes the `magic | command(12) | length | [checksum] |
//! payload` envelope against an async byte stream. Whether the 4-byte
//! double-SHA256 checksum is present is a property of the connection's
//! handshake state, held here as a flag: off while the version exchange
//! is in flight, on once the negotiated protocol version allows it.

use bytes::BufMut;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::NetworkParams;
use crate::crypto;
use crate::error::ProtocolError;
use crate::wire::messages::{Message, MAX_MESSAGE_SIZE};

/// Framing codec for one connection.
#[derive(Debug)]
pub struct MessageCodec {
    magic: u32,
    checksumming: AtomicBool,
}

impl MessageCodec {
    /// A codec with checksumming enabled, the steady state of an
    /// established connection.
    pub fn new(params: &NetworkParams) -> Self {
        MessageCodec {
            magic: params.magic,
            checksumming: AtomicBool::new(true),
        }
    }

    pub fn checksumming(&self) -> bool {
        self.checksumming.load(Ordering::Acquire)
    }

    /// Toggle checksummed framing. The connection flips this off for
    /// the version exchange and back on after observing the peer's
    /// protocol version.
    pub fn set_checksumming(&self, on: bool) {
        self.checksumming.store(on, Ordering::Release);
    }

    /// Frame a message into wire bytes under the current checksum mode.
    pub fn serialize(&self, msg: &Message) -> Vec<u8> {
        let mut payload = Vec::new();
        msg.write_payload(&mut payload);

        let mut frame = Vec::with_capacity(24 + payload.len());
        frame.put_u32_le(self.magic);

        let mut command = [0u8; 12];
        let name = msg.command().as_bytes();
        command[..name.len()].copy_from_slice(name);
        frame.put_slice(&command);

        frame.put_u32_le(payload.len() as u32);
        if self.checksumming() {
            frame.put_slice(&crypto::sha256d(&payload)[..4]);
        }
        frame.put_slice(&payload);
        frame
    }

    /// Write one framed message.
    pub async fn write_message<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        msg: &Message,
    ) -> Result<(), ProtocolError> {
        let frame = self.serialize(msg);
        writer.write_all(&frame).await?;
        writer.flush().await?;
        trace!(command = msg.command(), bytes = frame.len(), "sent message");
        Ok(())
    }

    /// Read the next understood message, skipping unknown commands.
    ///
    /// A magic mismatch, an oversized length, or a checksum mismatch is
    /// fatal for the connection.
    pub async fn read_message<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<Message, ProtocolError> {
        loop {
            let magic = read_u32_le(reader).await?;
            if magic != self.magic {
                return Err(ProtocolError::BadMagic {
                    expected: self.magic,
                    got: magic,
                });
            }

            let mut command_bytes = [0u8; 12];
            reader.read_exact(&mut command_bytes).await?;
            let end = command_bytes
                .iter()
                .position(|b| *b == 0)
                .unwrap_or(command_bytes.len());
            let command = String::from_utf8_lossy(&command_bytes[..end]).into_owned();

            let length = read_u32_le(reader).await?;
            if length > MAX_MESSAGE_SIZE {
                return Err(ProtocolError::OversizedPayload(length));
            }

            let expected_checksum = if self.checksumming() {
                let mut checksum = [0u8; 4];
                reader.read_exact(&mut checksum).await?;
                Some(checksum)
            } else {
                None
            };

            let mut payload = vec![0u8; length as usize];
            reader.read_exact(&mut payload).await?;

            if let Some(expected) = expected_checksum {
                if crypto::sha256d(&payload)[..4] != expected {
                    return Err(ProtocolError::BadChecksum);
                }
            }

            match Message::from_payload(&command, &payload)? {
                Some(msg) => {
                    trace!(command = %command, bytes = payload.len(), "received message");
                    return Ok(msg);
                }
                None => {
                    debug!(command = %command, bytes = payload.len(), "skipping unknown message");
                }
            }
        }
    }
}

async fn read_u32_le<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, ProtocolError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes).await?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::messages::{InventoryItem, InventoryMessage, PingMessage};

    fn codec() -> MessageCodec {
        MessageCodec::new(&NetworkParams::mainnet())
    }

    async fn read_back(codec: &MessageCodec, bytes: &[u8]) -> Result<Message, ProtocolError> {
        let mut slice = bytes;
        codec.read_message(&mut slice).await
    }

    #[tokio::test]
    async fn test_roundtrip_with_and_without_checksum() {
        let msg = Message::Inv(InventoryMessage {
            items: vec![InventoryItem::block([7u8; 32])],
        });
        for checksumming in [true, false] {
            let codec = codec();
            codec.set_checksumming(checksumming);
            let frame = codec.serialize(&msg);
            assert_eq!(read_back(&codec, &frame).await.unwrap(), msg);
        }
    }

    #[tokio::test]
    async fn test_checksum_presence_changes_frame_length() {
        let with = codec();
        let without = codec();
        without.set_checksumming(false);
        let msg = Message::Verack;
        assert_eq!(with.serialize(&msg).len(), 24);
        assert_eq!(without.serialize(&msg).len(), 20);
    }

    #[tokio::test]
    async fn test_flipped_payload_bit_fails_checksum() {
        let codec = codec();
        let msg = Message::Ping(PingMessage { nonce: Some(42) });
        let mut frame = codec.serialize(&msg);
        let payload_start = frame.len() - 8;
        frame[payload_start] ^= 0x01;
        match read_back(&codec, &frame).await {
            Err(ProtocolError::BadChecksum) => {}
            other => panic!("expected checksum failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_magic_is_fatal() {
        let codec = codec();
        let mut frame = codec.serialize(&Message::Verack);
        frame[0] ^= 0xff;
        match read_back(&codec, &frame).await {
            Err(ProtocolError::BadMagic { .. }) => {}
            other => panic!("expected magic failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_length_is_fatal() {
        let codec = codec();
        let mut frame = Vec::new();
        frame.put_u32_le(NetworkParams::mainnet().magic);
        frame.put_slice(b"block\0\0\0\0\0\0\0");
        frame.put_u32_le(MAX_MESSAGE_SIZE + 1);
        match read_back(&codec, &frame).await {
            Err(ProtocolError::OversizedPayload(_)) => {}
            other => panic!("expected oversize failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_command_is_skipped() {
        let codec = codec();
        // Hand-build a frame for a command this client does not speak.
        let mut bytes = Vec::new();
        bytes.put_u32_le(NetworkParams::mainnet().magic);
        bytes.put_slice(b"sendheaders\0");
        bytes.put_u32_le(0);
        bytes.put_slice(&crypto::sha256d(&[])[..4]);
        let msg = Message::Ping(PingMessage { nonce: None });
        bytes.extend_from_slice(&codec.serialize(&msg));

        assert_eq!(read_back(&codec, &bytes).await.unwrap(), msg);
    }

    #[tokio::test]
    async fn test_malformed_payload_reports_command() {
        let codec = codec();
        codec.set_checksumming(false);
        let mut frame = Vec::new();
        frame.put_u32_le(NetworkParams::mainnet().magic);
        frame.put_slice(b"inv\0\0\0\0\0\0\0\0\0");
        frame.put_u32_le(1);
        frame.put_u8(0x05); // claims five items, carries none
        match read_back(&codec, &frame).await {
            Err(ProtocolError::Malformed { command, .. }) => assert_eq!(command, "inv"),
            other => panic!("expected malformed failure, got {other:?}"),
        }
    }
}
