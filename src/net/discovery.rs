//! Peer discovery
//!
//! Sources of candidate peer addresses for the pool. DNS seeds are the
//! production path; a static list covers tests and private networks.
//! A source that fails reports a `DiscoveryError` and the pool moves on
//! to the next source, retrying on a later tick.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::lookup_host;
use tracing::{info, warn};

use crate::config::NetworkParams;
use crate::error::DiscoveryError;

/// Per-seed DNS lookup timeout.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A source of candidate peer endpoints.
#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    async fn peers(&self) -> Result<Vec<SocketAddr>, DiscoveryError>;
}

/// Discovery through the network's well-known DNS seed hosts.
pub struct DnsDiscovery {
    seeds: Vec<String>,
    port: u16,
}

impl DnsDiscovery {
    pub fn new(params: &NetworkParams) -> Self {
        DnsDiscovery {
            seeds: params.dns_seeds.iter().map(|s| s.to_string()).collect(),
            port: params.port,
        }
    }

    pub fn with_seeds(seeds: Vec<String>, port: u16) -> Self {
        DnsDiscovery { seeds, port }
    }
}

#[async_trait]
impl PeerDiscovery for DnsDiscovery {
    async fn peers(&self) -> Result<Vec<SocketAddr>, DiscoveryError> {
        let mut addresses = Vec::new();
        for seed in &self.seeds {
            let host = format!("{}:{}", seed, self.port);
            match tokio::time::timeout(LOOKUP_TIMEOUT, lookup_host(host)).await {
                Ok(Ok(resolved)) => {
                    let before = addresses.len();
                    addresses.extend(resolved.filter(|addr| addr.is_ipv4()));
                    info!(seed = %seed, count = addresses.len() - before, "resolved DNS seed");
                }
                Ok(Err(err)) => warn!(seed = %seed, %err, "DNS seed lookup failed"),
                Err(_) => warn!(seed = %seed, "DNS seed lookup timed out"),
            }
        }
        if addresses.is_empty() {
            return Err(DiscoveryError("no DNS seed returned any addresses".into()));
        }
        Ok(addresses)
    }
}

/// A fixed list of endpoints.
pub struct StaticSeeds {
    addresses: Vec<SocketAddr>,
}

impl StaticSeeds {
    pub fn new(addresses: Vec<SocketAddr>) -> Self {
        StaticSeeds { addresses }
    }
}

#[async_trait]
impl PeerDiscovery for StaticSeeds {
    async fn peers(&self) -> Result<Vec<SocketAddr>, DiscoveryError> {
        if self.addresses.is_empty() {
            return Err(DiscoveryError("static seed list is empty".into()));
        }
        Ok(self.addresses.clone())
    }
}
