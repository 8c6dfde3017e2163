//! Configuration
//!
//! `NetworkParams` carries the per-network constants (magic, default
//! port, protocol version, genesis hash, DNS seeds). `ClientConfig`
//! carries host-tunable knobs and can be loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::Hash;

/// Wire magic for the production network, little-endian `f9 be b4 d9`.
pub const MAGIC_MAINNET: u32 = 0xd9b4_bef9;
/// Wire magic for the test network, little-endian `0b 11 09 07`.
pub const MAGIC_TESTNET: u32 = 0x0709_110b;

/// Protocol version this library speaks and advertises.
pub const PROTOCOL_VERSION: u32 = 31800;

/// Peers at or above this version use checksummed message framing.
pub const MIN_CHECKSUM_VERSION: u32 = 209;

/// DNS seeds for the production network.
pub const MAINNET_DNS_SEEDS: &[&str] = &[
    "seed.bitcoin.sipa.be",
    "dnsseed.bluematt.me",
    "dnsseed.bitcoin.dashjr.org",
    "seed.bitcoinstats.com",
    "seed.bitcoin.jonasschnelli.ch",
    "seed.btc.petertodd.org",
];

/// DNS seeds for the test network.
pub const TESTNET_DNS_SEEDS: &[&str] = &[
    "testnet-seed.bitcoin.jonasschnelli.ch",
    "seed.tbtc.petertodd.org",
    "testnet-seed.bluematt.me",
];

/// Constants that select which network the client joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParams {
    /// Message framing magic, written little-endian on the wire.
    pub magic: u32,
    /// Default peer port.
    pub port: u16,
    /// Protocol version advertised in our version message.
    pub protocol_version: u32,
    /// Genesis block hash in internal (little-endian) byte order.
    pub genesis_hash: Hash,
    /// Well-known DNS seed hosts for this network.
    pub dns_seeds: &'static [&'static str],
}

impl NetworkParams {
    /// Production network parameters.
    pub fn mainnet() -> Self {
        NetworkParams {
            magic: MAGIC_MAINNET,
            port: 8333,
            protocol_version: PROTOCOL_VERSION,
            genesis_hash: genesis_hash_from_display(
                "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
            ),
            dns_seeds: MAINNET_DNS_SEEDS,
        }
    }

    /// Test network parameters.
    pub fn testnet() -> Self {
        NetworkParams {
            magic: MAGIC_TESTNET,
            port: 18333,
            protocol_version: PROTOCOL_VERSION,
            genesis_hash: genesis_hash_from_display(
                "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
            ),
            dns_seeds: TESTNET_DNS_SEEDS,
        }
    }
}

/// Convert a display-order (big-endian) hex block hash to internal
/// little-endian byte order.
fn genesis_hash_from_display(hex_str: &str) -> Hash {
    let mut hash = [0u8; 32];
    let bytes = hex::decode(hex_str).expect("genesis hash constants are valid hex");
    for (i, b) in bytes.iter().enumerate() {
        hash[31 - i] = *b;
    }
    hash
}

/// Host-tunable client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// TCP connect timeout in milliseconds. Also bounds handshake reads
    /// and every message write.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum number of concurrent peer connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Interval of the peer pool maintenance tick in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// User agent advertised in our version message.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Optional log filter applied when the host calls `logging::init`.
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_max_connections() -> usize {
    4
}

fn default_tick_interval_ms() -> u64 {
    10_000
}

fn default_user_agent() -> String {
    format!("/btclite:{}/", env!("CARGO_PKG_VERSION"))
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout_ms: default_connect_timeout_ms(),
            max_connections: default_max_connections(),
            tick_interval_ms: default_tick_interval_ms(),
            user_agent: default_user_agent(),
            log_filter: None,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }
}

/// Configuration loading failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.tick_interval(), Duration::from_secs(10));
        assert!(config.user_agent.starts_with("/btclite:"));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ClientConfig::from_toml("max_connections = 8\n").unwrap();
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.connect_timeout_ms, default_connect_timeout_ms());
    }

    #[test]
    fn test_genesis_hash_byte_order() {
        let params = NetworkParams::mainnet();
        // Internal order ends with the leading zero bytes of the display form.
        assert_eq!(&params.genesis_hash[28..], &[0, 0, 0, 0]);
        assert_eq!(params.genesis_hash[0], 0x6f);
    }

    #[test]
    fn test_network_magics_differ() {
        assert_ne!(NetworkParams::mainnet().magic, NetworkParams::testnet().magic);
        assert_eq!(NetworkParams::mainnet().magic.to_le_bytes(), [0xf9, 0xbe, 0xb4, 0xd9]);
    }
}
