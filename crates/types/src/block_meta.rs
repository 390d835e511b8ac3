//! Retained block header records.

use serde::{Deserialize, Serialize};

/// A transaction hash tracked inside a [`BlockMeta`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTx {
    /// The transaction hash.
    pub hash: String,
    /// The height the transaction was observed at.
    pub height: u64,
}

/// A recently seen block header plus the transaction hashes observed in it.
///
/// One record is retained per height inside the trailing rescan window. The
/// block hash is kept even for blocks with no relevant transactions: the
/// hash alone is what makes a later reorg detectable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// The block height.
    pub height: u64,
    /// The block hash, in the chain's native encoding.
    pub block_hash: String,
    /// The parent block hash.
    pub parent_hash: String,
    /// Transaction hashes observed in this block.
    pub transactions: Vec<TrackedTx>,
}

impl BlockMeta {
    /// Creates a new [`BlockMeta`] with no tracked transactions.
    pub fn new(height: u64, block_hash: impl Into<String>, parent_hash: impl Into<String>) -> Self {
        Self {
            height,
            block_hash: block_hash.into(),
            parent_hash: parent_hash.into(),
            transactions: Vec::new(),
        }
    }

    /// Records a transaction hash against this block. Re-adding an already
    /// tracked hash is a no-op.
    pub fn add_transaction(&mut self, hash: impl Into<String>) {
        let hash = hash.into();
        if !self.transactions.iter().any(|tx| tx.hash == hash) {
            self.transactions.push(TrackedTx { hash, height: self.height });
        }
    }

    /// Removes a tracked transaction hash, if present.
    pub fn remove_transaction(&mut self, hash: &str) {
        self.transactions.retain(|tx| tx.hash != hash);
    }
}
