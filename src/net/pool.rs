//! Peer pool
//!
//! Keeps up to `max_connections` peer sessions alive. A periodic,
//! single-entry maintenance tick pulls candidate addresses from
//! discovery, admits workers through a counting semaphore, and each
//! worker walks connect → run → death under the shared cancellation
//! token. One live peer at a time is elected to drive chain download;
//! when it dies a replacement is elected from the survivors.
//!
//! The pool is a cheap-to-clone handle over shared state; workers and
//! the control loop hold their own clones.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::{BlockChain, BlockStore, ConfidenceTable};
use crate::config::{ClientConfig, NetworkParams};
use crate::error::PeerError;
use crate::net::discovery::PeerDiscovery;
use crate::net::peer::{Peer, PeerEventListener};
use crate::wire::Transaction;

struct PoolState {
    /// FIFO of candidate addresses. Fed by discovery and by
    /// re-queueing the addresses of dead peers.
    inactives: VecDeque<SocketAddr>,
    peers: Vec<Arc<Peer>>,
    download_peer: Option<Arc<Peer>>,
    download_listener: Option<Arc<dyn PeerEventListener>>,
    running: bool,
}

/// Pool of concurrent peer sessions.
#[derive(Clone)]
pub struct PeerPool {
    params: NetworkParams,
    user_agent: String,
    connect_timeout: Duration,
    tick_interval: Duration,
    chain: Arc<dyn BlockChain>,
    store: Arc<dyn BlockStore>,
    confidence: Arc<ConfidenceTable>,
    discoverers: Arc<Mutex<Vec<Arc<dyn PeerDiscovery>>>>,
    listeners: Arc<Mutex<Vec<Arc<dyn PeerEventListener>>>>,
    state: Arc<Mutex<PoolState>>,
    /// Admission count for peer workers.
    workers: Arc<Semaphore>,
    /// Shutdown signal shared with every worker.
    cancel: CancellationToken,
    /// Non-blocking guard making the maintenance tick single-entry; a
    /// tick that finds it held is dropped, never queued.
    tick_guard: Arc<tokio::sync::Mutex<()>>,
}

impl PeerPool {
    pub fn new(
        params: NetworkParams,
        config: &ClientConfig,
        chain: Arc<dyn BlockChain>,
        store: Arc<dyn BlockStore>,
    ) -> Self {
        PeerPool {
            params,
            user_agent: config.user_agent.clone(),
            connect_timeout: config.connect_timeout(),
            tick_interval: config.tick_interval(),
            chain,
            store,
            confidence: Arc::new(ConfidenceTable::default()),
            discoverers: Arc::new(Mutex::new(Vec::new())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(Mutex::new(PoolState {
                inactives: VecDeque::new(),
                peers: Vec::new(),
                download_peer: None,
                download_listener: None,
                running: false,
            })),
            workers: Arc::new(Semaphore::new(config.max_connections)),
            cancel: CancellationToken::new(),
            tick_guard: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// The confidence table fed by all of this pool's peers.
    pub fn confidence_table(&self) -> Arc<ConfidenceTable> {
        self.confidence.clone()
    }

    pub fn add_discovery(&self, source: Arc<dyn PeerDiscovery>) {
        self.discoverers.lock().unwrap().push(source);
    }

    /// Register a listener for pool and peer events. Attached to every
    /// subsequently connected peer.
    pub fn add_listener(&self, listener: Arc<dyn PeerEventListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Queue a specific address ahead of discovery.
    pub fn add_address(&self, address: SocketAddr) {
        self.state.lock().unwrap().inactives.push_back(address);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().unwrap().peers.len()
    }

    pub fn connected_peers(&self) -> Vec<SocketAddr> {
        self.state
            .lock()
            .unwrap()
            .peers
            .iter()
            .map(|p| p.address())
            .collect()
    }

    /// Address of the current download peer, if one is elected.
    pub fn download_peer(&self) -> Option<SocketAddr> {
        self.state
            .lock()
            .unwrap()
            .download_peer
            .as_ref()
            .map(|p| p.address())
    }

    /// Start the maintenance loop. Returns immediately; connections
    /// are built up by the periodic tick.
    pub fn start(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.running {
                return;
            }
            state.running = true;
        }
        info!(interval = ?self.tick_interval, "starting peer pool");
        let pool = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = pool.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        // Single entry: a tick that overlaps a slow
                        // predecessor is dropped outright.
                        let Ok(_guard) = pool.tick_guard.try_lock() else {
                            debug!("previous tick still running; dropping this one");
                            continue;
                        };
                        pool.tick().await;
                    }
                }
            }
            debug!("pool control loop exited");
        });
    }

    /// Signal shutdown. Workers observe the cancellation token and
    /// drain on their own; this does not wait for them.
    pub fn stop(&self) {
        self.state.lock().unwrap().running = false;
        self.cancel.cancel();
        info!("peer pool stopping");
    }

    async fn tick(&self) {
        if !self.is_running() {
            return;
        }
        if self.workers.available_permits() == 0 {
            return;
        }

        let needs_discovery = self.state.lock().unwrap().inactives.is_empty();
        if needs_discovery {
            self.discover_peers().await;
        }

        let Some(address) = self.state.lock().unwrap().inactives.pop_front() else {
            return;
        };
        let Ok(permit) = Arc::clone(&self.workers).try_acquire_owned() else {
            self.state.lock().unwrap().inactives.push_back(address);
            return;
        };

        let pool = self.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            // Held for the worker's whole life; released on every exit
            // path when dropped.
            let _permit = permit;
            pool.run_peer(address, cancel).await;
        });
    }

    /// Try each discovery source in order until one yields addresses.
    async fn discover_peers(&self) {
        let sources: Vec<Arc<dyn PeerDiscovery>> = self.discoverers.lock().unwrap().clone();
        for source in sources {
            match source.peers().await {
                Ok(addresses) if !addresses.is_empty() => {
                    info!(count = addresses.len(), "discovered peer addresses");
                    self.state.lock().unwrap().inactives.extend(addresses);
                    return;
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "peer discovery source failed"),
            }
        }
    }

    async fn run_peer(&self, address: SocketAddr, cancel: CancellationToken) {
        let peer = Arc::new(Peer::new(
            self.params.clone(),
            address,
            self.chain.clone(),
            self.store.clone(),
            self.confidence.clone(),
            self.user_agent.clone(),
            self.connect_timeout,
        ));

        let result = async {
            peer.connect().await?;
            self.handle_new_peer(&peer).await;
            peer.run(cancel).await
        }
        .await;

        match result {
            Ok(()) => {}
            Err(PeerError::BlockStore(err)) => {
                error!(%err, "block store failure; stopping peer pool");
                self.stop();
            }
            Err(err) => info!(%address, %err, "peer died"),
        }

        self.handle_peer_death(&peer).await;
    }

    async fn handle_new_peer(&self, peer: &Arc<Peer>) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in &listeners {
            peer.add_listener(listener.clone());
        }

        let elected = {
            let mut state = self.state.lock().unwrap();
            state.peers.push(peer.clone());
            let count = state.peers.len();
            let elected = if state.download_listener.is_some() && state.download_peer.is_none() {
                state.download_peer = Some(peer.clone());
                state.download_listener.clone()
            } else {
                None
            };
            // Connection events carry the exact live count, so they
            // fire while the pool lock is held.
            for listener in &listeners {
                listener.peer_connected(count);
            }
            elected
        };

        if let Some(download_listener) = elected {
            self.start_download_on(peer, download_listener).await;
        }
    }

    async fn handle_peer_death(&self, peer: &Arc<Peer>) {
        let listeners = self.listeners.lock().unwrap().clone();
        let replacement = {
            let mut state = self.state.lock().unwrap();
            let before = state.peers.len();
            state.peers.retain(|p| !Arc::ptr_eq(p, peer));
            let removed = state.peers.len() != before;
            let count = state.peers.len();

            let was_download_peer = state
                .download_peer
                .as_ref()
                .is_some_and(|p| Arc::ptr_eq(p, peer));
            let mut replacement = None;
            if was_download_peer {
                state.download_peer = None;
                if let (Some(listener), Some(next)) = (
                    state.download_listener.clone(),
                    state.peers.first().cloned(),
                ) {
                    state.download_peer = Some(next.clone());
                    replacement = Some((next, listener));
                }
            }

            if state.running {
                state.inactives.push_back(peer.address());
            }

            if removed {
                for listener in &listeners {
                    listener.peer_disconnected(count);
                }
            }
            replacement
        };

        if let Some((next, listener)) = replacement {
            self.start_download_on(&next, listener).await;
        }
    }

    async fn start_download_on(&self, peer: &Arc<Peer>, listener: Arc<dyn PeerEventListener>) {
        info!(address = %peer.address(), "elected download peer");
        peer.add_listener(listener);
        match peer.start_block_chain_download().await {
            Ok(()) => {}
            Err(PeerError::BlockStore(err)) => {
                error!(%err, "block store failure; stopping peer pool");
                self.stop();
            }
            Err(err) => warn!(address = %peer.address(), %err, "failed to start chain download"),
        }
    }

    /// Request chain download. The current or next available peer is
    /// elected to drive it and `listener` observes progress.
    pub async fn start_block_chain_download(&self, listener: Arc<dyn PeerEventListener>) {
        let elected = {
            let mut state = self.state.lock().unwrap();
            state.download_listener = Some(listener.clone());
            if state.download_peer.is_none() {
                if let Some(peer) = state.peers.first().cloned() {
                    state.download_peer = Some(peer.clone());
                    Some(peer)
                } else {
                    None
                }
            } else {
                None
            }
        };
        if let Some(peer) = elected {
            self.start_download_on(&peer, listener).await;
        }
    }

    /// Announce a transaction to every live peer. Returns whether at
    /// least one peer accepted the announcement; per-peer failures are
    /// logged and swallowed.
    pub async fn broadcast_transaction(&self, tx: &Transaction) -> bool {
        let peers = self.state.lock().unwrap().peers.clone();
        let mut accepted = false;
        for peer in peers {
            match peer.broadcast_transaction(tx).await {
                Ok(()) => accepted = true,
                Err(err) => {
                    warn!(address = %peer.address(), %err, "failed to broadcast transaction");
                }
            }
        }
        accepted
    }
}
