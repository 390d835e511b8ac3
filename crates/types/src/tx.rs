//! Normalized inbound transactions.

use crate::{Chain, Coins};
use serde::{Deserialize, Serialize};

/// A single normalized inbound transaction observed on an external chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInItem {
    /// The transaction hash, in the chain's native encoding.
    pub tx_hash: String,
    /// The sending address.
    pub sender: String,
    /// The receiving address.
    pub to: String,
    /// The transferred coins.
    pub coins: Coins,
    /// The gas paid for the transaction.
    pub gas: Coins,
    /// The transaction memo.
    pub memo: String,
    /// The height of the block the transaction was included in. Zero for
    /// mempool observations.
    pub block_height: u64,
    /// The vault public key the transaction was observed against, when the
    /// extracting fetcher already resolved it.
    pub observed_vault_pub_key: Option<String>,
}

/// A batch of inbound transactions extracted from one block or one mempool
/// poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// The chain the batch was observed on.
    pub chain: Chain,
    /// The normalized transactions.
    pub tx_items: Vec<TxInItem>,
    /// True when the batch was extracted from the mempool and is therefore
    /// unconfirmed.
    pub mem_pool: bool,
}

impl TxIn {
    /// Creates a new confirmed-block batch.
    pub const fn new(chain: Chain, tx_items: Vec<TxInItem>) -> Self {
        Self { chain, tx_items, mem_pool: false }
    }

    /// Creates a new mempool batch.
    pub const fn new_mem_pool(chain: Chain, tx_items: Vec<TxInItem>) -> Self {
        Self { chain, tx_items, mem_pool: true }
    }

    /// Returns true when the batch carries no transactions.
    pub fn is_empty(&self) -> bool {
        self.tx_items.is_empty()
    }

    /// Returns the number of transactions in the batch.
    pub fn count(&self) -> usize {
        self.tx_items.len()
    }
}
