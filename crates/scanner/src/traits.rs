//! Contracts between the generic engine and its per-chain and consensus
//! collaborators.

use crate::{BridgeError, FetchError};
use alloy_primitives::U256;
use async_trait::async_trait;
use derive_more::Constructor;
use std::fmt::Debug;
use vigil_types::{BlockMeta, Chain, Coins, TxIn, TxStatus, Vault};

/// A block fetched from an external chain: the header record the engine
/// retains for reorg detection, plus the normalized transactions extracted
/// from it.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct ObservedBlock {
    /// The block header record.
    pub meta: BlockMeta,
    /// The transactions extracted from the block.
    pub tx_in: TxIn,
}

/// The per-chain capability a concrete chain integration must implement.
///
/// The engine treats every operation as a potentially slow, fallible remote
/// call. [`ChainFetcher::fetch_txs`] for a height the chain has not
/// produced yet must return [`FetchError::BlockNotAvailable`] rather than a
/// generic error so the scanner can retry silently instead of logging
/// noise.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainFetcher: Debug + Send + Sync {
    /// Fetches the current mempool, normalized against `height` (the next
    /// height the scanner expects to confirm).
    async fn fetch_mem_pool(&self, height: u64) -> Result<TxIn, FetchError>;

    /// Fetches the block at `height` and extracts its transactions.
    /// `chain_tip` is the tip height the scanner last observed.
    async fn fetch_txs(&self, height: u64, chain_tip: u64) -> Result<ObservedBlock, FetchError>;

    /// Returns the chain's current tip height.
    async fn get_height(&self) -> Result<u64, FetchError>;

    /// Returns the chain's current fee estimate as `(transaction size,
    /// rate per size unit)`.
    async fn get_network_fee(&self) -> Result<(u64, U256), FetchError>;
}

/// Read-only chain lookups used by reorg replay.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReplaySource: Debug + Send + Sync {
    /// Returns the canonical block hash at `height`, or `None` when the
    /// chain no longer has a block there.
    async fn block_hash_at(&self, height: u64) -> Result<Option<String>, FetchError>;

    /// Returns the current status of a previously observed transaction.
    async fn tx_status(&self, tx_hash: &str) -> Result<TxStatus, FetchError>;
}

/// On-chain balance lookups used by the solvency reporter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceSource: Debug + Send + Sync {
    /// Returns the coins currently held by `address`.
    async fn account_coins(&self, address: &str) -> Result<Coins, FetchError>;
}

/// The consensus-chain bridge the engine consults for scan coordination,
/// administrative halt flags, vault sets and published fees.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsensusBridge: Debug + Send + Sync {
    /// Returns the consensus chain's last observed inbound height for
    /// `chain`, or zero when it has none.
    async fn get_last_observed_in_height(&self, chain: &Chain) -> Result<u64, BridgeError>;

    /// Returns the consensus chain's own block height.
    async fn get_block_height(&self) -> Result<u64, BridgeError>;

    /// Returns the value of a named runtime flag. Unset flags read as a
    /// non-positive value.
    async fn get_mimir(&self, key: &str) -> Result<i64, BridgeError>;

    /// Returns the current vault set.
    async fn get_asgards(&self) -> Result<Vec<Vault>, BridgeError>;

    /// Returns the consensus chain's last published network fee for
    /// `chain` as `(transaction size, rate)`.
    async fn get_network_fee(&self, chain: &Chain) -> Result<(u64, U256), BridgeError>;

    /// Blocks until the consensus chain has finished catching up.
    async fn wait_to_catch_up(&self) -> Result<(), BridgeError>;
}
