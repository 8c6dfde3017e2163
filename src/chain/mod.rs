//! Block-chain collaborators and transaction confidence
//!
//! The client does not validate or store blocks itself; it drives an
//! external [`BlockChain`] and reads chain height through
//! [`BlockStore`]. What it does own is the per-transaction confidence
//! bookkeeping fed by the network layer.

pub mod confidence;
pub mod table;

pub use confidence::{ConfidenceError, ConfidenceLevel, ConfidenceListener, TransactionConfidence};
pub use table::ConfidenceTable;

use num_bigint::BigUint;
use std::sync::Mutex;

use crate::error::{BlockStoreError, VerificationError};
use crate::wire::Block;
use crate::Hash;

/// A block position on the best chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub hash: Hash,
    pub height: u32,
    /// Total work of the chain up to and including this block.
    pub chain_work: BigUint,
}

/// The validation engine downloaded blocks are handed to.
///
/// `add` returns whether the block connected to the chain; blocks that
/// fail validation raise [`VerificationError`], which the peer layer
/// propagates unchanged.
pub trait BlockChain: Send + Sync {
    fn add(&self, block: Block) -> Result<bool, VerificationError>;
    fn chain_head(&self) -> StoredBlock;
}

/// Read access to chain state persisted by the host application.
pub trait BlockStore: Send + Sync {
    fn chain_head(&self) -> Result<StoredBlock, BlockStoreError>;
}

/// In-memory store holding only the chain head. Enough for driving
/// download against an external chain, and for tests.
pub struct MemoryBlockStore {
    head: Mutex<StoredBlock>,
}

impl MemoryBlockStore {
    pub fn new(head: StoredBlock) -> Self {
        MemoryBlockStore {
            head: Mutex::new(head),
        }
    }

    /// A store positioned at the genesis block of `params`.
    pub fn at_genesis(params: &crate::config::NetworkParams) -> Self {
        Self::new(StoredBlock {
            hash: params.genesis_hash,
            height: 0,
            chain_work: BigUint::default(),
        })
    }

    pub fn set_chain_head(&self, head: StoredBlock) {
        *self.head.lock().unwrap() = head;
    }
}

impl BlockStore for MemoryBlockStore {
    fn chain_head(&self) -> Result<StoredBlock, BlockStoreError> {
        Ok(self.head.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_head_updates() {
        let store = MemoryBlockStore::at_genesis(&crate::config::NetworkParams::mainnet());
        assert_eq!(store.chain_head().unwrap().height, 0);

        store.set_chain_head(StoredBlock {
            hash: [9u8; 32],
            height: 120,
            chain_work: BigUint::from(1000u32),
        });
        let head = store.chain_head().unwrap();
        assert_eq!(head.height, 120);
        assert_eq!(head.hash, [9u8; 32]);
    }
}
