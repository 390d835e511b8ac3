//! Errata: retractions of previously observed transactions.

use crate::Chain;
use serde::{Deserialize, Serialize};

/// A retraction of a single previously observed transaction, issued when a
/// reorg proves it no longer exists on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrataTx {
    /// The chain the transaction was originally observed on.
    pub chain: Chain,
    /// The retracted transaction hash.
    pub tx_id: String,
}

/// All retractions produced for one original block height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrataBlock {
    /// The height the retracted transactions were originally observed at.
    pub height: u64,
    /// The retracted transactions.
    pub txs: Vec<ErrataTx>,
}
