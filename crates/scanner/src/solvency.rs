//! Vault solvency reporting.

use crate::{BalanceSource, ConsensusBridge, ScannerError, ScannerSinks};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{info, warn};
use vigil_types::{Chain, Solvency};

/// Compares the ledger's recorded vault balances against the chain and
/// posts solvency snapshots under a noise-minimizing policy.
///
/// When any vault is insolvent, only the insolvent vaults are reported:
/// reporting solvent vaults alongside causes oscillating halt/unhalt
/// cycles on the consensus chain. When the scanner is unhealthy and every
/// vault checks out, all vaults are reported solvent exactly once per
/// unhealthy episode so an automatic unhalt can go through.
#[derive(Debug)]
pub struct SolvencyReporter<B, S> {
    chain: Chain,
    bridge: Arc<B>,
    balances: Arc<S>,
    sinks: ScannerSinks,
    reported_while_unhealthy: AtomicBool,
}

impl<B, S> SolvencyReporter<B, S>
where
    B: ConsensusBridge,
    S: BalanceSource,
{
    /// Creates a new [`SolvencyReporter`].
    pub fn new(chain: Chain, bridge: Arc<B>, balances: Arc<S>, sinks: ScannerSinks) -> Self {
        Self { chain, bridge, balances, sinks, reported_while_unhealthy: AtomicBool::new(false) }
    }

    /// Runs one solvency pass at `height`.
    pub async fn report(&self, height: u64, healthy: bool) -> Result<(), ScannerError> {
        if healthy {
            self.reported_while_unhealthy.store(false, Ordering::Relaxed);
        }

        let mut insolvent = Vec::new();
        let mut solvent = Vec::new();
        for vault in self.bridge.get_asgards().await? {
            let Some(address) = vault.address_on(&self.chain) else {
                continue;
            };
            let on_chain = match self.balances.account_coins(address).await {
                Ok(coins) => coins,
                Err(err) => {
                    warn!(
                        target: "solvency_reporter",
                        chain = %self.chain,
                        pub_key = %vault.pub_key,
                        %err,
                        "failed to fetch vault balance, skipping vault"
                    );
                    continue;
                }
            };
            let recorded = vault.coins.for_chain(&self.chain);
            let is_insolvent =
                recorded.iter().any(|coin| on_chain.amount_of(&coin.asset) < coin.amount);
            let snapshot = Solvency {
                chain: self.chain.clone(),
                height,
                pub_key: vault.pub_key.clone(),
                coins: on_chain,
            };
            if is_insolvent {
                insolvent.push(snapshot);
            } else {
                solvent.push(snapshot);
            }
        }

        if !insolvent.is_empty() {
            for snapshot in insolvent {
                info!(
                    target: "solvency_reporter",
                    chain = %self.chain,
                    height,
                    id = %snapshot.id(),
                    pub_key = %snapshot.pub_key,
                    "reporting insolvent vault"
                );
                self.sinks.push_solvency(snapshot).await;
            }
        } else if !healthy && !self.reported_while_unhealthy.swap(true, Ordering::Relaxed) {
            for snapshot in solvent {
                self.sinks.push_solvency(snapshot).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockBalanceSource, MockConsensusBridge};
    use alloy_primitives::U256;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use vigil_types::{Asset, Coin, Coins, Vault};

    fn vault(pub_key: &str, address: &str, recorded: u64) -> Vault {
        let chain = Chain::new("ETH");
        Vault {
            pub_key: pub_key.to_string(),
            addresses: [(chain.clone(), address.to_string())].into_iter().collect(),
            coins: Coins::new(vec![Coin::new(Asset::new("ETH", "ETH"), U256::from(recorded))]),
        }
    }

    fn balances(per_address: Vec<(&'static str, u64)>) -> MockBalanceSource {
        let mut source = MockBalanceSource::new();
        source.expect_account_coins().returning(move |address| {
            let amount = per_address
                .iter()
                .find(|(a, _)| *a == address)
                .map_or(0, |(_, amount)| *amount);
            Ok(Coins::new(vec![Coin::new(Asset::new("ETH", "ETH"), U256::from(amount))]))
        });
        source
    }

    fn reporter(
        bridge: MockConsensusBridge,
        source: MockBalanceSource,
    ) -> (SolvencyReporter<MockConsensusBridge, MockBalanceSource>, mpsc::Receiver<Solvency>) {
        let (tx_in, _) = mpsc::channel(8);
        let (network_fee, _) = mpsc::channel(8);
        let (errata, _) = mpsc::channel(8);
        let (solvency, solvency_rx) = mpsc::channel(8);
        let sinks =
            ScannerSinks::new(tx_in, network_fee, errata, solvency, Duration::from_millis(50));
        (
            SolvencyReporter::new(Chain::new("ETH"), Arc::new(bridge), Arc::new(source), sinks),
            solvency_rx,
        )
    }

    #[tokio::test]
    async fn only_insolvent_vaults_are_reported() {
        let mut bridge = MockConsensusBridge::new();
        bridge
            .expect_get_asgards()
            .returning(|| Ok(vec![vault("vault-ok", "0xok", 50), vault("vault-bad", "0xbad", 100)]));
        // vault-bad holds less on-chain than the ledger believes.
        let source = balances(vec![("0xok", 50), ("0xbad", 40)]);
        let (reporter, mut solvency_rx) = reporter(bridge, source);

        reporter.report(100, true).await.unwrap();

        let snapshot = solvency_rx.try_recv().unwrap();
        assert_eq!(snapshot.pub_key, "vault-bad");
        assert!(solvency_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn all_solvent_is_reported_once_while_unhealthy() {
        let mut bridge = MockConsensusBridge::new();
        bridge.expect_get_asgards().returning(|| Ok(vec![vault("vault-ok", "0xok", 50)]));
        let source = balances(vec![("0xok", 50)]);
        let (reporter, mut solvency_rx) = reporter(bridge, source);

        // Healthy: solvent vaults are not reported at all.
        reporter.report(100, true).await.unwrap();
        assert!(solvency_rx.try_recv().is_err());

        // Unhealthy: reported once, then latched.
        reporter.report(110, false).await.unwrap();
        assert_eq!(solvency_rx.try_recv().unwrap().pub_key, "vault-ok");
        reporter.report(120, false).await.unwrap();
        assert!(solvency_rx.try_recv().is_err());

        // Health returning resets the latch for the next episode.
        reporter.report(130, true).await.unwrap();
        reporter.report(140, false).await.unwrap();
        assert_eq!(solvency_rx.try_recv().unwrap().pub_key, "vault-ok");
    }

    #[tokio::test]
    async fn vaults_without_an_address_on_this_chain_are_skipped() {
        let mut bridge = MockConsensusBridge::new();
        bridge.expect_get_asgards().returning(|| {
            Ok(vec![Vault {
                pub_key: "vault-btc".to_string(),
                addresses: [(Chain::new("BTC"), "bc1q".to_string())].into_iter().collect(),
                coins: Coins::default(),
            }])
        });
        let mut source = MockBalanceSource::new();
        source.expect_account_coins().times(0);
        let (reporter, mut solvency_rx) = reporter(bridge, source);

        reporter.report(100, false).await.unwrap();
        assert!(solvency_rx.try_recv().is_err());
    }
}
