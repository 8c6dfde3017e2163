//! Peer networking
//!
//! The connection, session and pool layers: one `NetworkConnection`
//! per socket, one `Peer` session per connection, and a `PeerPool`
//! that keeps a bounded set of sessions alive, discovers addresses and
//! elects the chain-download peer.

pub mod connection;
pub mod discovery;
pub mod peer;
pub mod pool;

pub use connection::NetworkConnection;
pub use discovery::{DnsDiscovery, PeerDiscovery, StaticSeeds};
pub use peer::{Peer, PeerEventListener, PeerState};
pub use pool::PeerPool;
