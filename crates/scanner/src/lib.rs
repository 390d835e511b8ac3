//! The generic block-observation engine.
//!
//! One [`BlockScanner`] per observed chain drives two independent polling
//! loops: the chain-tip scan loop, which fetches blocks in strictly
//! increasing height order, detects and recovers from reorganizations, and
//! feeds smoothed fee and solvency observations to the consensus chain; and
//! the mempool loop, which keeps unconfirmed transactions observable even
//! while a chain is administratively halted.
//!
//! Per-chain behavior is plugged in through the [`ChainFetcher`],
//! [`ReplaySource`] and [`BalanceSource`] contracts, and coordination with
//! the consensus chain through [`ConsensusBridge`]. Results leave the
//! engine exclusively through the bounded [`ScannerSinks`].

mod error;
pub use error::{BridgeError, FetchError, ScannerError};

mod traits;
pub use traits::{BalanceSource, ChainFetcher, ConsensusBridge, ObservedBlock, ReplaySource};

#[cfg(test)]
pub(crate) use traits::{
    MockBalanceSource, MockChainFetcher, MockConsensusBridge, MockReplaySource,
};

mod config;
pub use config::{FeePolicy, ScannerConfig};

mod sinks;
pub use sinks::ScannerSinks;

mod fees;
pub use fees::FeeAggregator;

mod reorg;
pub use reorg::ReorgMonitor;

mod solvency;
pub use solvency::SolvencyReporter;

mod halt;

mod scanner;
pub use scanner::{BlockScanner, ScannerHandle, ScannerHandles};

#[cfg(feature = "metrics")]
mod metrics;
