//! Peer session
//!
//! Drives one connected peer: the inbound message loop, transaction
//! and block inventory handling, chain download when this peer is the
//! elected download peer, and outbound transaction announcement.
//! Every networking failure leaves through `run`'s single `PeerError`
//! exit; the pool reacts by reclaiming the worker.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{BlockChain, BlockStore, ConfidenceTable};
use crate::config::NetworkParams;
use crate::error::PeerError;
use crate::net::connection::NetworkConnection;
use crate::wire::messages::{
    AlertMessage, Block, BlockHeader, GetBlocksMessage, InvType, InventoryItem, InventoryMessage,
    Message, PeerAddress, Transaction,
};
use crate::Hash;

/// Lifecycle of a peer session. `Downloading` is `Running` while this
/// peer is additionally the elected download peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Initial,
    Connecting,
    Handshaking,
    Running,
    Downloading,
    Disconnected,
}

impl PeerState {
    pub fn is_running(self) -> bool {
        matches!(self, PeerState::Running | PeerState::Downloading)
    }
}

/// Callbacks for network events. All methods default to no-ops so
/// hosts implement only what they observe.
pub trait PeerEventListener: Send + Sync {
    /// A peer joined the pool; `peer_count` is the new live count.
    fn peer_connected(&self, peer_count: usize) {
        let _ = peer_count;
    }

    /// A peer left the pool; `peer_count` is the remaining live count.
    fn peer_disconnected(&self, peer_count: usize) {
        let _ = peer_count;
    }

    /// Chain download began against `peer` with an estimated
    /// `blocks_left` to fetch.
    fn chain_download_started(&self, peer: &PeerAddress, blocks_left: u32) {
        let _ = (peer, blocks_left);
    }

    /// A block arrived during chain download.
    fn blocks_downloaded(&self, peer: &PeerAddress, block: &Block, blocks_left: u32) {
        let _ = (peer, block, blocks_left);
    }

    fn transaction_received(&self, peer: &PeerAddress, tx: &Transaction) {
        let _ = (peer, tx);
    }

    fn addresses_received(&self, peer: &PeerAddress, addresses: &[PeerAddress]) {
        let _ = (peer, addresses);
    }

    fn headers_received(&self, peer: &PeerAddress, headers: &[BlockHeader]) {
        let _ = (peer, headers);
    }

    fn alert_received(&self, peer: &PeerAddress, alert: &AlertMessage) {
        let _ = (peer, alert);
    }
}

/// A single peer session owned by the pool.
pub struct Peer {
    params: NetworkParams,
    address: SocketAddr,
    user_agent: String,
    connect_timeout: Duration,
    chain: Arc<dyn BlockChain>,
    store: Arc<dyn BlockStore>,
    confidence: Arc<ConfidenceTable>,
    connection: OnceLock<Arc<NetworkConnection>>,
    state: Mutex<PeerState>,
    listeners: Mutex<Vec<Arc<dyn PeerEventListener>>>,
    /// In-flight `getdata` block requests. Entries without waiters are
    /// chain-download fetches; entries with waiters are explicit
    /// `get_block` futures.
    pending_blocks: Mutex<HashMap<InventoryItem, Vec<oneshot::Sender<Block>>>>,
    /// Transactions we announced, served when the peer requests them.
    announced: Mutex<HashMap<Hash, Transaction>>,
    /// Transaction hashes this peer already told us about.
    seen_txs: Mutex<HashSet<Hash>>,
}

impl Peer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: NetworkParams,
        address: SocketAddr,
        chain: Arc<dyn BlockChain>,
        store: Arc<dyn BlockStore>,
        confidence: Arc<ConfidenceTable>,
        user_agent: String,
        connect_timeout: Duration,
    ) -> Self {
        Peer {
            params,
            address,
            user_agent,
            connect_timeout,
            chain,
            store,
            confidence,
            connection: OnceLock::new(),
            state: Mutex::new(PeerState::Initial),
            listeners: Mutex::new(Vec::new()),
            pending_blocks: Mutex::new(HashMap::new()),
            announced: Mutex::new(HashMap::new()),
            seen_txs: Mutex::new(HashSet::new()),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// This peer as a wire address, carrying its advertised services
    /// once the handshake has completed.
    pub fn peer_address(&self) -> PeerAddress {
        let services = self
            .connection
            .get()
            .map(|conn| conn.peer_version().services)
            .unwrap_or(0);
        PeerAddress::new(self.address, services)
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock().unwrap()
    }

    pub fn is_downloading(&self) -> bool {
        self.state() == PeerState::Downloading
    }

    pub fn add_listener(&self, listener: Arc<dyn PeerEventListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn PeerEventListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn listeners(&self) -> Vec<Arc<dyn PeerEventListener>> {
        self.listeners.lock().unwrap().clone()
    }

    fn set_state(&self, state: PeerState) {
        *self.state.lock().unwrap() = state;
    }

    fn connection(&self) -> Result<Arc<NetworkConnection>, PeerError> {
        self.connection.get().cloned().ok_or(PeerError::Disconnected)
    }

    /// The peer's advertised height minus our chain head height.
    fn blocks_left(&self) -> Result<u32, PeerError> {
        let conn = self.connection()?;
        let head = self.store.chain_head()?;
        Ok(conn.best_height().saturating_sub(head.height))
    }

    /// Establish the connection and run the handshake.
    pub async fn connect(&self) -> Result<(), PeerError> {
        self.set_state(PeerState::Connecting);
        let head = match self.store.chain_head() {
            Ok(head) => head,
            Err(err) => {
                self.set_state(PeerState::Disconnected);
                return Err(err.into());
            }
        };
        self.set_state(PeerState::Handshaking);
        match NetworkConnection::connect(
            &self.params,
            self.address,
            head.height,
            &self.user_agent,
            self.connect_timeout,
        )
        .await
        {
            Ok(conn) => {
                let _ = self.connection.set(Arc::new(conn));
                self.set_state(PeerState::Running);
                Ok(())
            }
            Err(err) => {
                self.set_state(PeerState::Disconnected);
                Err(err)
            }
        }
    }

    /// Blocking inbound loop. Exits promptly through `disconnect` when
    /// `cancel` fires; every networking failure surfaces as the
    /// returned `PeerError`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PeerError> {
        let conn = self.connection()?;
        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(address = %self.address, "peer loop cancelled");
                    break Ok(());
                }
                read = conn.read_message() => match read {
                    Ok(msg) => {
                        if let Err(err) = self.process_message(&conn, msg).await {
                            break Err(err);
                        }
                    }
                    Err(err) => break Err(err),
                }
            }
        };
        self.disconnect().await;
        result
    }

    async fn process_message(
        &self,
        conn: &NetworkConnection,
        msg: Message,
    ) -> Result<(), PeerError> {
        match msg {
            Message::Inv(inv) => self.process_inv(conn, inv).await,
            Message::GetData(request) => self.process_getdata(conn, request).await,
            Message::Block(block) => self.process_block(block).await,
            Message::Tx(tx) => {
                self.process_transaction(tx);
                Ok(())
            }
            Message::Ping(ping) => {
                // No reply expected at this protocol version.
                debug!(address = %self.address, nonce = ?ping.nonce, "ping");
                Ok(())
            }
            Message::Addr(addr) => {
                let peer = self.peer_address();
                for listener in self.listeners() {
                    listener.addresses_received(&peer, &addr.addresses);
                }
                Ok(())
            }
            Message::Headers(headers) => {
                let peer = self.peer_address();
                for listener in self.listeners() {
                    listener.headers_received(&peer, &headers.headers);
                }
                Ok(())
            }
            Message::Alert(alert) => {
                info!(address = %self.address, bytes = alert.payload.len(), "received alert");
                let peer = self.peer_address();
                for listener in self.listeners() {
                    listener.alert_received(&peer, &alert);
                }
                Ok(())
            }
            other => {
                debug!(address = %self.address, command = other.command(), "unhandled message");
                Ok(())
            }
        }
    }

    async fn process_inv(
        &self,
        conn: &NetworkConnection,
        inv: InventoryMessage,
    ) -> Result<(), PeerError> {
        let mut request = Vec::new();
        {
            let downloading = self.is_downloading();
            let mut seen = self.seen_txs.lock().unwrap();
            let mut pending = self.pending_blocks.lock().unwrap();
            for item in &inv.items {
                match item.kind {
                    InvType::Transaction => {
                        if seen.insert(item.hash) {
                            request.push(*item);
                        }
                    }
                    // Block announcements feed the download pipeline
                    // only while this peer drives it.
                    InvType::Block => {
                        if downloading && !pending.contains_key(item) {
                            pending.insert(*item, Vec::new());
                            request.push(*item);
                        }
                    }
                    InvType::Error => {}
                }
            }
        }
        if !request.is_empty() {
            debug!(address = %self.address, count = request.len(), "requesting inventory");
            conn.write_message(&Message::GetData(InventoryMessage { items: request }))
                .await?;
        }
        Ok(())
    }

    async fn process_getdata(
        &self,
        conn: &NetworkConnection,
        request: InventoryMessage,
    ) -> Result<(), PeerError> {
        let mut serve = Vec::new();
        {
            let announced = self.announced.lock().unwrap();
            for item in &request.items {
                if item.kind == InvType::Transaction {
                    if let Some(tx) = announced.get(&item.hash) {
                        serve.push(tx.clone());
                    }
                }
            }
        }
        for tx in serve {
            debug!(address = %self.address, hash = %hex::encode(tx.hash()), "serving announced tx");
            conn.write_message(&Message::Tx(tx)).await?;
        }
        Ok(())
    }

    fn process_transaction(&self, tx: Transaction) {
        let hash = tx.hash();
        debug!(address = %self.address, hash = %hex::encode(hash), "received tx");
        let peer = self.peer_address();
        self.confidence.get_or_create(hash).mark_broadcast_by(peer.clone());
        for listener in self.listeners() {
            listener.transaction_received(&peer, &tx);
        }
    }

    async fn process_block(&self, block: Block) -> Result<(), PeerError> {
        let hash = block.hash();
        let item = InventoryItem::block(hash);
        let waiters = self.pending_blocks.lock().unwrap().remove(&item);

        if let Some(waiters) = waiters {
            if !waiters.is_empty() {
                // An explicit fetch: complete the futures and keep the
                // block out of the download pipeline.
                for waiter in waiters {
                    let _ = waiter.send(block.clone());
                }
                return Ok(());
            }
        }

        if !self.is_downloading() {
            debug!(address = %self.address, hash = %hex::encode(hash), "ignoring unsolicited block");
            return Ok(());
        }

        let connected = self.chain.add(block.clone())?;
        if !connected {
            debug!(address = %self.address, hash = %hex::encode(hash), "block did not connect yet");
        }
        let blocks_left = self.blocks_left()?;
        let peer = self.peer_address();
        for listener in self.listeners() {
            listener.blocks_downloaded(&peer, &block, blocks_left);
        }
        Ok(())
    }

    /// Begin chain download from our current chain head. Issued by the
    /// pool when this peer wins the download election.
    pub async fn start_block_chain_download(&self) -> Result<(), PeerError> {
        let conn = self.connection()?;
        self.set_state(PeerState::Downloading);

        let head = self.store.chain_head()?;
        let blocks_left = conn.best_height().saturating_sub(head.height);
        let peer = self.peer_address();
        info!(address = %self.address, blocks_left, "starting block chain download");
        for listener in self.listeners() {
            listener.chain_download_started(&peer, blocks_left);
        }
        if blocks_left == 0 {
            return Ok(());
        }

        conn.write_message(&Message::GetBlocks(GetBlocksMessage {
            version: self.params.protocol_version,
            locator: vec![head.hash, self.params.genesis_hash],
            stop_hash: [0u8; 32],
        }))
        .await
    }

    /// Announce a transaction and serve it when the peer asks.
    pub async fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), PeerError> {
        let conn = self.connection()?;
        let hash = tx.hash();
        self.announced.lock().unwrap().insert(hash, tx.clone());
        conn.write_message(&Message::Inv(InventoryMessage {
            items: vec![InventoryItem::transaction(hash)],
        }))
        .await
    }

    /// Fetch one block by hash. Resolves when the peer delivers it;
    /// fails with [`PeerError::Disconnected`] if the session ends
    /// first.
    pub async fn get_block(&self, hash: Hash) -> Result<Block, PeerError> {
        let conn = self.connection()?;
        let (sender, receiver) = oneshot::channel();
        self.pending_blocks
            .lock()
            .unwrap()
            .entry(InventoryItem::block(hash))
            .or_default()
            .push(sender);
        conn.write_message(&Message::GetData(InventoryMessage {
            items: vec![InventoryItem::block(hash)],
        }))
        .await?;
        receiver.await.map_err(|_| PeerError::Disconnected)
    }

    /// Tear the session down. Idempotent, callable from any task, and
    /// wakes every pending `get_block` future.
    pub async fn disconnect(&self) {
        let already_disconnected = {
            let mut state = self.state.lock().unwrap();
            let was = *state == PeerState::Disconnected;
            *state = PeerState::Disconnected;
            was
        };
        if let Some(conn) = self.connection.get() {
            conn.shutdown().await;
        }
        // Dropping the senders fails the corresponding futures.
        self.pending_blocks.lock().unwrap().clear();
        if !already_disconnected {
            warn!(address = %self.address, "peer disconnected");
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}
