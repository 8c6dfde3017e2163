//! Bounded confidence table
//!
//! Confidence records are shared between the network layer and the
//! host, keyed by transaction hash. The table is a fixed-capacity LRU:
//! once full, touching a new transaction evicts the least recently
//! used record, and its confidence history is forgotten by design.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crate::chain::confidence::TransactionConfidence;
use crate::Hash;

/// Default number of transactions tracked.
pub const DEFAULT_CAPACITY: usize = 1000;

/// LRU-bounded map from transaction hash to shared confidence record.
pub struct ConfidenceTable {
    records: Mutex<LruCache<Hash, Arc<TransactionConfidence>>>,
}

impl Default for ConfidenceTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ConfidenceTable {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ConfidenceTable {
            records: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The confidence record for `hash`, created fresh if the
    /// transaction is new or was evicted.
    pub fn get_or_create(&self, hash: Hash) -> Arc<TransactionConfidence> {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.get(&hash) {
            return existing.clone();
        }
        let created = Arc::new(TransactionConfidence::new());
        records.put(hash, created.clone());
        created
    }

    /// The confidence record for `hash`, if still tracked.
    pub fn get(&self, hash: &Hash) -> Option<Arc<TransactionConfidence>> {
        self.records.lock().unwrap().get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
