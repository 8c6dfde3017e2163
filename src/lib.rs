//! btclite - lightweight Bitcoin peer-to-peer client library
//!
//! Speaks the Bitcoin wire protocol to remote peers, maintains a
//! bounded pool of peer connections to drive block-chain download and
//! transaction relay, and evaluates Bitcoin Script to validate how
//! transaction inputs spend outputs.
//!
//! What it deliberately does not do: validate or store blocks (that is
//! the host's [`chain::BlockChain`] and [`chain::BlockStore`]), manage
//! wallet keys, or mine. The heavy machinery lives in three places:
//!
//! - [`script`] - the Script interpreter with its consensus limits
//! - [`wire`] - byte-exact message framing and typed payloads
//! - [`net`] - connection handshake, peer sessions and the peer pool
//!
//! A host wires these together roughly like this: build a
//! [`config::NetworkParams`] and [`config::ClientConfig`], construct a
//! [`net::PeerPool`] over its `BlockChain`/`BlockStore`
//! implementations, register discovery (for example
//! [`net::DnsDiscovery`]) and listeners, and call `start`.

pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod net;
pub mod script;
pub mod wire;

/// A 32-byte double-SHA256 hash in internal (little-endian) byte
/// order, as it travels on the wire.
pub type Hash = [u8; 32];

pub use chain::{BlockChain, BlockStore, ConfidenceTable, StoredBlock, TransactionConfidence};
pub use config::{ClientConfig, NetworkParams};
pub use error::{
    BlockStoreError, DiscoveryError, PeerError, ProtocolError, ScriptError, VerificationError,
};
pub use net::{PeerEventListener, PeerPool};
pub use script::Script;
pub use wire::{Block, BlockHeader, Message, Transaction};
