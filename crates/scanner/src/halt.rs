//! Administrative halt evaluation.

use crate::{BridgeError, ConsensusBridge};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::warn;
use vigil_types::Chain;

/// Evaluates whether a chain is administratively halted or paused.
///
/// The halt flags live on the consensus chain and change rarely, so the
/// verdict is re-evaluated at most once per nominal block interval and
/// cached in between.
#[derive(Debug)]
pub(crate) struct HaltChecker<B> {
    chain: Chain,
    bridge: Arc<B>,
    interval: Duration,
    cached: Mutex<Option<(Instant, bool)>>,
}

impl<B> HaltChecker<B>
where
    B: ConsensusBridge,
{
    pub(crate) fn new(chain: Chain, bridge: Arc<B>, interval: Duration) -> Self {
        Self { chain, bridge, interval, cached: Mutex::new(None) }
    }

    /// Whether the chain is currently halted or paused. Bridge failures
    /// read as "not paused": stalling every scanner because the consensus
    /// chain is briefly unreachable would be the larger liveness risk.
    pub(crate) async fn is_chain_paused(&self) -> bool {
        let mut cached = self.cached.lock().await;
        if let Some((at, value)) = *cached {
            if at.elapsed() < self.interval {
                return value;
            }
        }
        let paused = match self.query().await {
            Ok(paused) => paused,
            Err(err) => {
                warn!(target: "block_scanner", chain = %self.chain, %err, "failed to query halt flags");
                false
            }
        };
        *cached = Some((Instant::now(), paused));
        paused
    }

    async fn query(&self) -> Result<bool, BridgeError> {
        let consensus_height = self.bridge.get_block_height().await? as i64;

        let halt_global = self.bridge.get_mimir("HaltGlobal").await?;
        let halt_chain = self.bridge.get_mimir(&format!("Halt{}", self.chain)).await?;
        let solvency_halt = self.bridge.get_mimir(&format!("SolvencyHalt{}", self.chain)).await?;
        let node_pause = self.bridge.get_mimir("NodePauseGlobal").await?;

        // A halt flag takes effect once the consensus chain reaches its
        // height; a node pause holds while its height is still ahead.
        let halted_at = |value: i64| value > 0 && value <= consensus_height;
        let halted = halted_at(halt_global) || halted_at(halt_chain) || halted_at(solvency_halt);
        let paused = node_pause > consensus_height;

        Ok(halted || paused)
    }
}
