//! Vault solvency snapshots.

use crate::{Chain, Coins};
use alloy_primitives::hex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A point-in-time balance snapshot for one vault, posted to the consensus
/// chain under the solvency reporting policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solvency {
    /// The chain the snapshot was taken on.
    pub chain: Chain,
    /// The height the snapshot was taken at.
    pub height: u64,
    /// The vault public key.
    pub pub_key: String,
    /// The vault's on-chain balances at `height`.
    pub coins: Coins,
}

impl Solvency {
    /// Returns a deterministic short identifier for this snapshot, used in
    /// log lines.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.chain.as_str().as_bytes());
        hasher.update(self.height.to_be_bytes());
        hasher.update(self.pub_key.as_bytes());
        for coin in self.coins.iter() {
            hasher.update(coin.asset.to_string().as_bytes());
            hasher.update(coin.amount.to_be_bytes::<32>());
        }
        hex::encode(&hasher.finalize()[..8])
    }
}
