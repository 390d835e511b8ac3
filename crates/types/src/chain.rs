//! External chain identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Identifier of an external chain observed by the node (`"BTC"`, `"ETH"`,
/// `"GAIA"`, ...).
///
/// Chain identifiers are normalized to upper case on construction so that
/// lookups and persisted key prefixes are case-insensitive.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[display("{_0}")]
pub struct Chain(String);

impl Chain {
    /// Creates a new [`Chain`] from a ticker string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_uppercase())
    }

    /// Returns the chain identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Chain {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
