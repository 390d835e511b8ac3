//! The persisted trailing window of block header records.

use crate::{KeyValueStore, StoreError};
use std::sync::Arc;
use tracing::debug;
use vigil_types::{BlockMeta, Chain};

/// A bounded, persisted window of recent [`BlockMeta`] records for one
/// chain.
///
/// The ledger is a ring window keyed by height, not an unbounded history:
/// records older than the reorg rescan depth are pruned eagerly on every
/// successful advance.
#[derive(Debug, Clone)]
pub struct BlockMetaLedger {
    chain: Chain,
    db: Arc<dyn KeyValueStore>,
}

impl BlockMetaLedger {
    /// Creates a new [`BlockMetaLedger`] scoped to `chain`.
    pub fn new(chain: Chain, db: Arc<dyn KeyValueStore>) -> Self {
        Self { chain, db }
    }

    fn prefix(&self) -> String {
        format!("blockmeta/{}/", self.chain)
    }

    // Heights are zero-padded so byte order equals numeric order.
    fn key(&self, height: u64) -> Vec<u8> {
        format!("{}{:020}", self.prefix(), height).into_bytes()
    }

    /// Returns the retained record for `height`, when present.
    pub fn get(&self, height: u64) -> Result<Option<BlockMeta>, StoreError> {
        match self.db.get(&self.key(height))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Persists `meta`, replacing any record previously retained for its
    /// height.
    pub fn save(&self, meta: &BlockMeta) -> Result<(), StoreError> {
        self.db.put(&self.key(meta.height), &serde_json::to_vec(meta)?)
    }

    /// Returns all retained records, ordered by ascending height.
    pub fn all(&self) -> Result<Vec<BlockMeta>, StoreError> {
        self.db
            .scan_prefix(self.prefix().as_bytes())?
            .into_iter()
            .map(|(_, raw)| serde_json::from_slice(&raw).map_err(StoreError::from))
            .collect()
    }

    /// Deletes every retained record older than `before_height`.
    pub fn prune(&self, before_height: u64) -> Result<(), StoreError> {
        for meta in self.all()? {
            if meta.height < before_height {
                debug!(
                    target: "block_meta_ledger",
                    chain = %self.chain,
                    height = meta.height,
                    "pruning block meta"
                );
                self.db.delete(&self.key(meta.height))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn ledger() -> BlockMetaLedger {
        BlockMetaLedger::new(Chain::new("ETH"), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn round_trips_block_meta() {
        let ledger = ledger();
        let mut meta = BlockMeta::new(7, "0xaa", "0xbb");
        meta.add_transaction("0x01");
        ledger.save(&meta).unwrap();

        assert_eq!(ledger.get(7).unwrap(), Some(meta));
        assert_eq!(ledger.get(8).unwrap(), None);
    }

    #[test]
    fn all_is_ordered_across_digit_boundaries() {
        let ledger = ledger();
        for height in [2u64, 100, 9, 30] {
            ledger.save(&BlockMeta::new(height, "0xaa", "0xbb")).unwrap();
        }
        let heights: Vec<u64> = ledger.all().unwrap().into_iter().map(|m| m.height).collect();
        assert_eq!(heights, vec![2, 9, 30, 100]);
    }

    #[test]
    fn prune_drops_only_older_heights() {
        let ledger = ledger();
        for height in 1..=10u64 {
            ledger.save(&BlockMeta::new(height, "0xaa", "0xbb")).unwrap();
        }
        ledger.prune(6).unwrap();
        let heights: Vec<u64> = ledger.all().unwrap().into_iter().map(|m| m.height).collect();
        assert_eq!(heights, vec![6, 7, 8, 9, 10]);
    }
}
