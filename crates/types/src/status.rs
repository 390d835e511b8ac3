//! On-chain transaction status, as seen during reorg replay.

use serde::{Deserialize, Serialize};

/// The status of a previously observed transaction when re-verified against
/// the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// The transaction is known but not yet included in a block.
    Pending,
    /// The transaction is included in a block, with its receipt outcome.
    Confirmed {
        /// Whether the receipt reports successful execution.
        success: bool,
    },
    /// The transaction is known but its receipt outcome could not be
    /// determined.
    Unknown,
    /// The transaction is no longer known to the chain.
    NotFound,
}

impl TxStatus {
    /// Whether a replayed transaction should still be treated as valid.
    ///
    /// Pending and unknown-receipt transactions count as valid: wrongly
    /// retracting an observation penalizes the vault that signed for it, so
    /// the check errs toward keeping transactions when the chain cannot
    /// prove they are gone.
    pub const fn still_valid(&self) -> bool {
        match self {
            Self::Pending | Self::Unknown => true,
            Self::Confirmed { success } => *success,
            Self::NotFound => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_or_failed_txs_are_invalid() {
        assert!(TxStatus::Pending.still_valid());
        assert!(TxStatus::Unknown.still_valid());
        assert!(TxStatus::Confirmed { success: true }.still_valid());
        assert!(!TxStatus::Confirmed { success: false }.still_valid());
        assert!(!TxStatus::NotFound.still_valid());
    }
}
