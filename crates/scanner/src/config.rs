//! Scanner configuration.

use crate::ScannerError;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use vigil_types::Chain;

/// How observed fees are smoothed before being reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeePolicy {
    /// Per-block fee observations; once the window is full the reported
    /// value is `mean + 3 * stddev` over the window. Suits chains with a
    /// base-fee / priority-fee market.
    #[default]
    Statistical,
    /// Per-transaction fee observations; the reported value is the plain
    /// mean over the window, recomputed every `fee_report_blocks` heights.
    Mean,
}

/// Configuration for one chain's [`crate::BlockScanner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// The chain this scanner observes.
    pub chain: Chain,
    /// Forces the scan start height, skipping startup discovery entirely.
    pub start_block_height: Option<u64>,
    /// Sleep applied on soft and hard fetch failures.
    pub block_height_discover_backoff: Duration,
    /// Retention window of the block meta ledger, and the replay depth on
    /// reorg.
    pub max_reorg_rescan_blocks: u64,
    /// Fee and solvency side effects are skipped while the scanned height
    /// trails the tip by more than this many blocks.
    pub observation_flexibility_blocks: u64,
    /// Wall-clock lag beyond which the scanner reports itself unhealthy.
    pub max_healthy_lag: Duration,
    /// Allowed wall-clock divergence between the local persisted position
    /// and the consensus height at startup.
    pub max_resume_block_lag: Duration,
    /// Capacity of the rolling fee window.
    pub gas_cache_blocks: usize,
    /// Fee observations are rounded up to this resolution under
    /// [`FeePolicy::Statistical`].
    pub gas_price_resolution: U256,
    /// The fee smoothing policy for this chain.
    pub fee_policy: FeePolicy,
    /// Report cadence, in blocks, under [`FeePolicy::Mean`].
    pub fee_report_blocks: u64,
    /// Enables the independent mempool scan loop.
    pub scan_mem_pool: bool,
    /// The chain's nominal block time.
    pub chain_block_time: Duration,
    /// Confirmation depth required before an observation is final; feeds
    /// the rollback window.
    pub max_confirmations: u64,
    /// Solvency check cadence, in blocks.
    pub solvency_check_blocks: u64,
    /// When true, startup discovery uses the consensus chain's own height
    /// instead of its last-observed-in height for this chain.
    pub is_consensus_chain: bool,
}

impl ScannerConfig {
    /// Creates a configuration for `chain` with default tuning.
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            start_block_height: None,
            block_height_discover_backoff: Duration::from_millis(300),
            max_reorg_rescan_blocks: 100,
            observation_flexibility_blocks: 10,
            max_healthy_lag: Duration::from_secs(300),
            max_resume_block_lag: Duration::from_secs(1800),
            gas_cache_blocks: 100,
            gas_price_resolution: U256::from(1u64),
            fee_policy: FeePolicy::Statistical,
            fee_report_blocks: 10,
            scan_mem_pool: false,
            chain_block_time: Duration::from_secs(6),
            max_confirmations: 0,
            solvency_check_blocks: 10,
            is_consensus_chain: false,
        }
    }

    /// Validates the configuration, failing fast on values that would
    /// stall or divide-by-zero the scan loop.
    pub fn validate(&self) -> Result<(), ScannerError> {
        if self.chain_block_time.is_zero() {
            return Err(ScannerError::Config("chain_block_time must be non-zero".into()));
        }
        if self.max_reorg_rescan_blocks == 0 {
            return Err(ScannerError::Config("max_reorg_rescan_blocks must be non-zero".into()));
        }
        if self.gas_cache_blocks == 0 {
            return Err(ScannerError::Config("gas_cache_blocks must be non-zero".into()));
        }
        if self.gas_price_resolution.is_zero() {
            return Err(ScannerError::Config("gas_price_resolution must be non-zero".into()));
        }
        if self.fee_report_blocks == 0 {
            return Err(ScannerError::Config("fee_report_blocks must be non-zero".into()));
        }
        Ok(())
    }

    /// The number of chain blocks in one simulated day.
    pub fn blocks_per_day(&self) -> u64 {
        (86_400 / self.chain_block_time.as_secs().max(1)).max(1)
    }

    /// [`Self::max_resume_block_lag`] converted from wall clock to a block
    /// count using the chain's nominal block time.
    pub fn max_resume_blocks(&self) -> u64 {
        (self.max_resume_block_lag.as_secs() / self.chain_block_time.as_secs().max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ScannerConfig::new(Chain::new("ETH")).validate().is_ok());
    }

    #[test]
    fn zero_block_time_is_rejected() {
        let mut cfg = ScannerConfig::new(Chain::new("ETH"));
        cfg.chain_block_time = Duration::ZERO;
        assert!(matches!(cfg.validate(), Err(ScannerError::Config(_))));
    }

    #[test]
    fn resume_lag_converts_to_blocks() {
        let mut cfg = ScannerConfig::new(Chain::new("ETH"));
        cfg.chain_block_time = Duration::from_secs(12);
        cfg.max_resume_block_lag = Duration::from_secs(1200);
        assert_eq!(cfg.max_resume_blocks(), 100);
    }
}
