//! Vault records, as reported by the consensus chain.

use crate::{Chain, Coins};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A threshold-signature vault holding pooled funds on external chains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// The vault's public key.
    pub pub_key: String,
    /// The vault's address on each chain it holds funds on.
    pub addresses: BTreeMap<Chain, String>,
    /// The coins the ledger believes the vault holds, across all chains.
    pub coins: Coins,
}

impl Vault {
    /// Returns the vault's address on `chain`, when it has one.
    pub fn address_on(&self, chain: &Chain) -> Option<&str> {
        self.addresses.get(chain).map(String::as_str)
    }
}
