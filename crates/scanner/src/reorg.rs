//! Reorg detection and ledger replay.

use crate::{ReplaySource, ScannerError, ScannerSinks};
use std::sync::Arc;
use tracing::{info, warn};
use vigil_types::{BlockMeta, Chain, ErrataBlock, ErrataTx};
use vigil_store::BlockMetaLedger;

/// Detects chain reorganizations against the retained block meta window and
/// replays the window when one is found.
///
/// Replay re-verifies every previously recorded transaction against the
/// chain. A transaction is only retracted when the chain can prove it is
/// gone or failed; pending and unknown-receipt transactions are kept
/// (see [`vigil_types::TxStatus::still_valid`]).
#[derive(Debug)]
pub struct ReorgMonitor<R> {
    chain: Chain,
    ledger: BlockMetaLedger,
    source: Arc<R>,
    sinks: ScannerSinks,
    rescan_depth: u64,
}

impl<R> ReorgMonitor<R>
where
    R: ReplaySource,
{
    /// Creates a new [`ReorgMonitor`].
    pub fn new(
        chain: Chain,
        ledger: BlockMetaLedger,
        source: Arc<R>,
        sinks: ScannerSinks,
        rescan_depth: u64,
    ) -> Self {
        Self { chain, ledger, source, sinks, rescan_depth }
    }

    /// Accepts a freshly fetched block into the ledger.
    ///
    /// If the block's parent hash does not match the retained hash at
    /// `height - 1` a reorg is in flight: the retained window is replayed
    /// first, and the heights whose blocks have been replaced are returned
    /// for a full rescan. The new block's meta is always persisted, even
    /// when it carries no transactions, and the window is pruned behind
    /// the rescan depth.
    pub async fn process_block(&self, meta: &BlockMeta) -> Result<Vec<u64>, ScannerError> {
        let reorged = match self.ledger.get(meta.height.saturating_sub(1))? {
            Some(prev) => prev.block_hash != meta.parent_hash,
            None => false,
        };

        let rescan = if reorged {
            warn!(
                target: "reorg_monitor",
                chain = %self.chain,
                height = meta.height,
                parent_hash = %meta.parent_hash,
                "parent hash mismatch, replaying retained blocks"
            );
            self.replay(meta.height).await?
        } else {
            Vec::new()
        };

        self.ledger.save(meta)?;
        self.ledger.prune(meta.height.saturating_sub(self.rescan_depth))?;
        Ok(rescan)
    }

    /// Replays every retained block below `tip_height`, emitting errata for
    /// transactions the chain no longer carries and collecting the heights
    /// whose blocks have diverged.
    async fn replay(&self, tip_height: u64) -> Result<Vec<u64>, ScannerError> {
        let mut rescan = Vec::new();
        for mut meta in self.ledger.all()? {
            if meta.height >= tip_height {
                continue;
            }
            let diverged = match self.source.block_hash_at(meta.height).await {
                Ok(Some(hash)) => hash != meta.block_hash,
                Ok(None) => true,
                Err(err) => {
                    warn!(
                        target: "reorg_monitor",
                        chain = %self.chain,
                        height = meta.height,
                        %err,
                        "could not re-verify retained block, keeping it"
                    );
                    false
                }
            };
            if !diverged {
                continue;
            }

            let retracted = self.retracted_txs(&meta).await;
            if !retracted.is_empty() {
                info!(
                    target: "reorg_monitor",
                    chain = %self.chain,
                    height = meta.height,
                    count = retracted.len(),
                    "emitting errata for reorged transactions"
                );
                #[cfg(feature = "metrics")]
                metrics::counter!(crate::metrics::Metrics::ERRATA_EMITTED, "chain" => self.chain.to_string())
                    .increment(retracted.len() as u64);
                let errata = ErrataBlock {
                    height: meta.height,
                    txs: retracted
                        .iter()
                        .map(|hash| ErrataTx { chain: self.chain.clone(), tx_id: hash.clone() })
                        .collect(),
                };
                self.sinks.push_errata(errata).await?;
                for hash in &retracted {
                    meta.remove_transaction(hash);
                }
                self.ledger.save(&meta)?;
            }
            rescan.push(meta.height);
        }
        Ok(rescan)
    }

    /// The recorded transactions of `meta` the chain can prove absent or
    /// failed. Lookup failures keep the transaction.
    async fn retracted_txs(&self, meta: &BlockMeta) -> Vec<String> {
        let mut retracted = Vec::new();
        for tx in &meta.transactions {
            let valid = match self.source.tx_status(&tx.hash).await {
                Ok(status) => status.still_valid(),
                Err(err) => {
                    warn!(
                        target: "reorg_monitor",
                        chain = %self.chain,
                        tx_hash = %tx.hash,
                        %err,
                        "could not re-verify transaction, keeping it"
                    );
                    true
                }
            };
            if !valid {
                retracted.push(tx.hash.clone());
            }
        }
        retracted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockReplaySource, ScannerSinks};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use vigil_store::MemoryStore;
    use vigil_types::TxStatus;

    struct Fixture {
        monitor: ReorgMonitor<MockReplaySource>,
        ledger: BlockMetaLedger,
        errata_rx: mpsc::Receiver<ErrataBlock>,
    }

    fn fixture(source: MockReplaySource) -> Fixture {
        let chain = Chain::new("ETH");
        let ledger = BlockMetaLedger::new(chain.clone(), Arc::new(MemoryStore::new()));
        let (tx_in, _) = mpsc::channel(8);
        let (network_fee, _) = mpsc::channel(8);
        let (errata, errata_rx) = mpsc::channel(8);
        let (solvency, _) = mpsc::channel(8);
        let sinks =
            ScannerSinks::new(tx_in, network_fee, errata, solvency, Duration::from_millis(50));
        let monitor = ReorgMonitor::new(chain, ledger.clone(), Arc::new(source), sinks, 5);
        Fixture { monitor, ledger, errata_rx }
    }

    fn meta(height: u64, hash: &str, parent: &str) -> BlockMeta {
        BlockMeta::new(height, hash, parent)
    }

    #[tokio::test]
    async fn matching_parent_hash_is_not_a_reorg() {
        let mut source = MockReplaySource::new();
        source.expect_block_hash_at().times(0);
        let fx = fixture(source);

        fx.ledger.save(&meta(10, "0xaa", "0x99")).unwrap();
        let rescan = fx.monitor.process_block(&meta(11, "0xbb", "0xaa")).await.unwrap();
        assert!(rescan.is_empty());
        assert!(fx.ledger.get(11).unwrap().is_some());
    }

    #[tokio::test]
    async fn errata_are_emitted_only_for_confirmed_absent_txs() {
        let mut source = MockReplaySource::new();
        // Height 10 has been replaced on-chain.
        source.expect_block_hash_at().returning(|_| Ok(Some("0xnew".to_string())));
        source.expect_tx_status().returning(|hash| match hash {
            "0xgone" => Ok(TxStatus::NotFound),
            "0xpending" => Ok(TxStatus::Pending),
            _ => Ok(TxStatus::Confirmed { success: true }),
        });
        let mut fx = fixture(source);

        let mut old = meta(10, "0xaa", "0x99");
        old.add_transaction("0xgone");
        old.add_transaction("0xpending");
        old.add_transaction("0xkept");
        fx.ledger.save(&old).unwrap();

        let rescan = fx.monitor.process_block(&meta(11, "0xbb", "0xreorged")).await.unwrap();
        assert_eq!(rescan, vec![10]);

        let errata = fx.errata_rx.try_recv().unwrap();
        assert_eq!(errata.height, 10);
        assert_eq!(errata.txs.len(), 1);
        assert_eq!(errata.txs[0].tx_id, "0xgone");

        // The retracted hash is gone from the retained record; the kept
        // ones remain.
        let replayed = fx.ledger.get(10).unwrap().unwrap();
        let hashes: Vec<_> = replayed.transactions.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, vec!["0xpending", "0xkept"]);
    }

    #[tokio::test]
    async fn status_lookup_failure_keeps_the_tx() {
        let mut source = MockReplaySource::new();
        source.expect_block_hash_at().returning(|_| Ok(None));
        source.expect_tx_status().returning(|_| Err(crate::FetchError::Rpc("timeout".into())));
        let mut fx = fixture(source);

        let mut old = meta(10, "0xaa", "0x99");
        old.add_transaction("0xunverifiable");
        fx.ledger.save(&old).unwrap();

        let rescan = fx.monitor.process_block(&meta(11, "0xbb", "0xreorged")).await.unwrap();
        // The block itself diverged and is rescanned, but no errata were
        // emitted for the unverifiable tx.
        assert_eq!(rescan, vec![10]);
        assert!(fx.errata_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn old_heights_are_pruned_behind_the_rescan_depth() {
        let source = MockReplaySource::new();
        let fx = fixture(source);

        for height in 1..=10u64 {
            fx.ledger.save(&meta(height, "0xaa", "0xaa")).unwrap();
        }
        // rescan_depth is 5: accepting height 11 prunes below 6.
        fx.monitor.process_block(&meta(11, "0xbb", "0xaa")).await.unwrap();
        let heights: Vec<u64> = fx.ledger.all().unwrap().into_iter().map(|m| m.height).collect();
        assert_eq!(heights, vec![6, 7, 8, 9, 10, 11]);
    }
}
