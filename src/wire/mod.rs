//! Bitcoin wire protocol
//!
//! Message framing and the typed payloads the client speaks: the
//! `magic | command | length | [checksum] | payload` envelope, the
//! compact length encodings, and byte-exact serialization for the
//! version handshake, inventory exchange, block download and
//! transaction relay messages.

pub mod codec;
pub mod messages;

pub(crate) mod buffer;

pub use codec::MessageCodec;
pub use messages::{
    AddrMessage, AlertMessage, Block, BlockHeader, GetBlocksMessage, GetHeadersMessage,
    HeadersMessage, InvType, InventoryItem, InventoryMessage, Message, OutPoint, PeerAddress,
    PingMessage, Transaction, TxInput, TxOutput, VersionMessage,
};
