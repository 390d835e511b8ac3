//! Assets and coin amounts.

use crate::Chain;
use alloy_primitives::U256;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// A chain-scoped asset identifier, rendered as `CHAIN.SYMBOL`
/// (`"ETH.USDC"`, `"BTC.BTC"`).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[display("{chain}.{symbol}")]
pub struct Asset {
    /// The chain the asset lives on.
    pub chain: Chain,
    /// The asset ticker on that chain.
    pub symbol: String,
}

impl Asset {
    /// Creates a new [`Asset`].
    pub fn new(chain: impl Into<Chain>, symbol: impl Into<String>) -> Self {
        Self { chain: chain.into(), symbol: symbol.into().to_uppercase() }
    }
}

/// An amount of a single asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// The asset denomination.
    pub asset: Asset,
    /// The amount, in the asset's smallest unit.
    pub amount: U256,
}

impl Coin {
    /// Creates a new [`Coin`].
    pub const fn new(asset: Asset, amount: U256) -> Self {
        Self { asset, amount }
    }
}

/// An ordered collection of [`Coin`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coins(Vec<Coin>);

impl Coins {
    /// Creates a new [`Coins`] collection.
    pub const fn new(coins: Vec<Coin>) -> Self {
        Self(coins)
    }

    /// Returns true when the collection holds no coins.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of coins in the collection.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the coins.
    pub fn iter(&self) -> impl Iterator<Item = &Coin> {
        self.0.iter()
    }

    /// Returns the amount held for `asset`, or zero when absent.
    pub fn amount_of(&self, asset: &Asset) -> U256 {
        self.0.iter().find(|c| &c.asset == asset).map_or(U256::ZERO, |c| c.amount)
    }

    /// Returns the subset of coins whose asset lives on `chain`.
    pub fn for_chain(&self, chain: &Chain) -> Self {
        Self(self.0.iter().filter(|c| &c.asset.chain == chain).cloned().collect())
    }
}

impl From<Vec<Coin>> for Coins {
    fn from(coins: Vec<Coin>) -> Self {
        Self(coins)
    }
}

impl IntoIterator for Coins {
    type Item = Coin;
    type IntoIter = std::vec::IntoIter<Coin>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
