//! Transaction confidence tracking
//!
//! Observational state about how settled a transaction is: which peers
//! announced it, whether and where it entered the best chain, how
//! deeply it is buried, and whether a double spend killed it. State
//! changes fire registered listeners exactly once per real change, and
//! always outside the state lock so a listener may call back in.

use num_bigint::BigUint;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::wire::{BlockHeader, PeerAddress};
use crate::Hash;

/// How settled a transaction currently looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    /// Nothing observed yet.
    Unknown,
    /// Announced by peers but not found in any block.
    NotSeenInChain,
    /// In a block, but not on the best chain.
    NotInBestChain,
    /// In a best-chain block.
    Building,
    /// Overridden by a double spend.
    Dead,
}

/// Callback fired after an observable confidence change.
pub trait ConfidenceListener: Send + Sync {
    fn confidence_changed(&self, confidence: &TransactionConfidence);
}

/// Accessing a field that is meaningless at the current level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfidenceError {
    #[error("confidence level is {actual:?}, not {required:?}")]
    WrongLevel {
        required: ConfidenceLevel,
        actual: ConfidenceLevel,
    },
}

#[derive(Debug, Clone)]
struct State {
    level: ConfidenceLevel,
    broadcast_by: HashSet<PeerAddress>,
    appeared_at_height: u32,
    depth: u32,
    work_done: BigUint,
    overriding_tx: Option<Hash>,
}

/// Shared, internally synchronized confidence record for one
/// transaction.
pub struct TransactionConfidence {
    state: Mutex<State>,
    listeners: Mutex<Vec<Arc<dyn ConfidenceListener>>>,
}

impl Default for TransactionConfidence {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionConfidence {
    pub fn new() -> Self {
        TransactionConfidence {
            state: Mutex::new(State {
                level: ConfidenceLevel::Unknown,
                broadcast_by: HashSet::new(),
                appeared_at_height: 0,
                depth: 0,
                work_done: BigUint::default(),
                overriding_tx: None,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn level(&self) -> ConfidenceLevel {
        self.state.lock().unwrap().level
    }

    pub fn add_listener(&self, listener: Arc<dyn ConfidenceListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConfidenceListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Record that `peer` announced this transaction. The first
    /// announcement lifts an unknown transaction to
    /// [`ConfidenceLevel::NotSeenInChain`].
    pub fn mark_broadcast_by(&self, peer: PeerAddress) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            let mut changed = state.broadcast_by.insert(peer);
            if state.level == ConfidenceLevel::Unknown {
                state.level = ConfidenceLevel::NotSeenInChain;
                changed = true;
            }
            changed
        };
        if changed {
            self.fire_listeners();
        }
    }

    /// Number of distinct peers that have announced this transaction.
    pub fn num_broadcast_peers(&self) -> usize {
        self.state.lock().unwrap().broadcast_by.len()
    }

    pub fn broadcast_by(&self) -> Vec<PeerAddress> {
        self.state
            .lock()
            .unwrap()
            .broadcast_by
            .iter()
            .cloned()
            .collect()
    }

    /// Record inclusion in the best chain at `height`. Depth restarts
    /// at one (the top block); `notify_work_done` accumulates from
    /// there as the chain grows.
    pub fn set_appeared_at_chain_height(&self, height: u32) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            let changed =
                state.level != ConfidenceLevel::Building || state.appeared_at_height != height;
            state.level = ConfidenceLevel::Building;
            state.appeared_at_height = height;
            state.depth = 1;
            state.work_done = BigUint::default();
            changed
        };
        if changed {
            self.fire_listeners();
        }
    }

    pub fn appeared_at_chain_height(&self) -> Result<u32, ConfidenceError> {
        let state = self.state.lock().unwrap();
        require_level(&state, ConfidenceLevel::Building)?;
        Ok(state.appeared_at_height)
    }

    /// Blocks on top of and including the one holding the transaction.
    pub fn depth(&self) -> Result<u32, ConfidenceError> {
        let state = self.state.lock().unwrap();
        require_level(&state, ConfidenceLevel::Building)?;
        Ok(state.depth)
    }

    /// Cumulative work of the blocks burying the transaction.
    pub fn work_done(&self) -> Result<BigUint, ConfidenceError> {
        let state = self.state.lock().unwrap();
        require_level(&state, ConfidenceLevel::Building)?;
        Ok(state.work_done.clone())
    }

    /// Account one new best-chain block built on top of the
    /// transaction. No-op unless the transaction is building.
    pub fn notify_work_done(&self, header: &BlockHeader) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            if state.level != ConfidenceLevel::Building {
                false
            } else {
                state.depth += 1;
                state.work_done = &state.work_done + header.work();
                true
            }
        };
        if changed {
            self.fire_listeners();
        }
    }

    /// Record a side-chain placement.
    pub fn set_not_in_best_chain(&self) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            let changed = state.level != ConfidenceLevel::NotInBestChain;
            state.level = ConfidenceLevel::NotInBestChain;
            changed
        };
        if changed {
            self.fire_listeners();
        }
    }

    /// Record that `tx` double spent this transaction's inputs,
    /// killing it.
    pub fn set_overriding_tx(&self, tx: Hash) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            let changed =
                state.level != ConfidenceLevel::Dead || state.overriding_tx != Some(tx);
            state.level = ConfidenceLevel::Dead;
            state.overriding_tx = Some(tx);
            changed
        };
        if changed {
            self.fire_listeners();
        }
    }

    pub fn overriding_tx(&self) -> Result<Hash, ConfidenceError> {
        let state = self.state.lock().unwrap();
        if state.level != ConfidenceLevel::Dead {
            return Err(ConfidenceError::WrongLevel {
                required: ConfidenceLevel::Dead,
                actual: state.level,
            });
        }
        Ok(state.overriding_tx.expect("dead level always has an overriding tx"))
    }

    /// Copy the observational state without the listeners.
    pub fn duplicate(&self) -> TransactionConfidence {
        TransactionConfidence {
            state: Mutex::new(self.state.lock().unwrap().clone()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn fire_listeners(&self) {
        let listeners: Vec<_> = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.confidence_changed(self);
        }
    }
}

fn require_level(state: &State, required: ConfidenceLevel) -> Result<(), ConfidenceError> {
    if state.level != required {
        return Err(ConfidenceError::WrongLevel {
            required,
            actual: state.level,
        });
    }
    Ok(())
}

impl std::fmt::Debug for TransactionConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("TransactionConfidence")
            .field("level", &state.level)
            .field("broadcast_peers", &state.broadcast_by.len())
            .field("depth", &state.depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn peer(n: u8) -> PeerAddress {
        PeerAddress::new(format!("10.0.0.{n}:8333").parse().unwrap(), 1)
    }

    fn header(bits: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block: [0; 32],
            merkle_root: [0; 32],
            time: 0,
            bits,
            nonce: 0,
        }
    }

    struct CountingListener(AtomicUsize);

    impl ConfidenceListener for CountingListener {
        fn confidence_changed(&self, _confidence: &TransactionConfidence) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_broadcast_counts_distinct_peers() {
        let confidence = TransactionConfidence::new();
        confidence.mark_broadcast_by(peer(1));
        confidence.mark_broadcast_by(peer(2));
        confidence.mark_broadcast_by(peer(1));
        assert_eq!(confidence.num_broadcast_peers(), 2);
        assert_eq!(confidence.level(), ConfidenceLevel::NotSeenInChain);
    }

    #[test]
    fn test_listener_fires_once_per_real_change() {
        let confidence = TransactionConfidence::new();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        confidence.add_listener(listener.clone());

        confidence.mark_broadcast_by(peer(1));
        confidence.mark_broadcast_by(peer(1)); // duplicate, no change
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);

        confidence.set_appeared_at_chain_height(100);
        confidence.set_appeared_at_chain_height(100); // no change
        assert_eq!(listener.0.load(Ordering::SeqCst), 2);

        confidence.notify_work_done(&header(0x1d00_ffff));
        assert_eq!(listener.0.load(Ordering::SeqCst), 3);

        let as_dyn: Arc<dyn ConfidenceListener> = listener.clone();
        confidence.remove_listener(&as_dyn);
        confidence.set_overriding_tx([1u8; 32]);
        assert_eq!(listener.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_building_fields_require_building() {
        let confidence = TransactionConfidence::new();
        assert!(matches!(
            confidence.depth(),
            Err(ConfidenceError::WrongLevel { .. })
        ));
        assert!(confidence.appeared_at_chain_height().is_err());
        assert!(confidence.work_done().is_err());

        confidence.set_appeared_at_chain_height(42);
        assert_eq!(confidence.appeared_at_chain_height().unwrap(), 42);
        assert_eq!(confidence.depth().unwrap(), 1);
        assert_eq!(confidence.work_done().unwrap(), BigUint::default());
    }

    #[test]
    fn test_work_accumulates_monotonically() {
        let confidence = TransactionConfidence::new();
        confidence.set_appeared_at_chain_height(7);
        let mut last_depth = confidence.depth().unwrap();
        let mut last_work = confidence.work_done().unwrap();
        for _ in 0..3 {
            confidence.notify_work_done(&header(0x1d00_ffff));
            let depth = confidence.depth().unwrap();
            let work = confidence.work_done().unwrap();
            assert!(depth > last_depth);
            assert!(work > last_work);
            last_depth = depth;
            last_work = work;
        }
        assert_eq!(last_depth, 4);
    }

    #[test]
    fn test_notify_work_done_ignored_outside_building() {
        let confidence = TransactionConfidence::new();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        confidence.add_listener(listener.clone());
        confidence.notify_work_done(&header(0x1d00_ffff));
        assert_eq!(listener.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dead_requires_overriding_tx() {
        let confidence = TransactionConfidence::new();
        assert!(confidence.overriding_tx().is_err());
        confidence.set_overriding_tx([3u8; 32]);
        assert_eq!(confidence.level(), ConfidenceLevel::Dead);
        assert_eq!(confidence.overriding_tx().unwrap(), [3u8; 32]);
    }

    #[test]
    fn test_duplicate_drops_listeners() {
        let confidence = TransactionConfidence::new();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        confidence.add_listener(listener.clone());
        confidence.mark_broadcast_by(peer(1));

        let copy = confidence.duplicate();
        assert_eq!(copy.num_broadcast_peers(), 1);
        copy.mark_broadcast_by(peer(2));
        // Only the original's listener invocation is recorded.
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }
}
