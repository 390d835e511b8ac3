//! Network fee observations.

use crate::Chain;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// A network fee observation posted to the consensus chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFee {
    /// The chain the fee was observed on.
    pub chain: Chain,
    /// The height the fee was computed at.
    pub height: u64,
    /// The size, in the chain's native unit (gas, vbytes), of a typical
    /// outbound transaction.
    pub transaction_size: u64,
    /// The recommended fee rate per size unit.
    pub transaction_rate: U256,
}
