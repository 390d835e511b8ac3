//! The top-level polling engine.

use crate::{
    BalanceSource, ChainFetcher, ConsensusBridge, FeeAggregator, FeePolicy, FetchError,
    ObservedBlock, ReorgMonitor, ReplaySource, ScannerConfig, ScannerError, ScannerSinks,
    SolvencyReporter, halt::HaltChecker,
};
use alloy_primitives::U256;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_store::{BlockMetaLedger, KeyValueStore, PositionStore};
use vigil_types::{NetworkFee, TxIn};

/// Lag, in blocks, below which the scanner is healthy regardless of wall
/// clock.
const MAX_HEALTHY_LAG_BLOCKS: u64 = 3;

/// How often the scan loop logs a progress line.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Scan state shared between the loops and [`ScannerHandle`]s.
#[derive(Debug, Default)]
struct ScannerState {
    previous_height: AtomicU64,
    healthy: AtomicBool,
}

/// A rollback request drained at the top of each scan iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RollbackRequest {
    /// Roll back to an explicit height.
    ToHeight(u64),
    /// Roll back behind the consensus chain's last observed height.
    ToLastObserved,
}

/// External control surface over a running [`BlockScanner`].
#[derive(Debug, Clone)]
pub struct ScannerHandle {
    state: Arc<ScannerState>,
    rollback_tx: mpsc::Sender<RollbackRequest>,
    cancellation: CancellationToken,
}

impl ScannerHandle {
    /// Whether the most recent scan outcome was healthy. Never blocks.
    pub fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::SeqCst)
    }

    /// The last fully processed height.
    pub fn height(&self) -> u64 {
        self.state.previous_height.load(Ordering::SeqCst)
    }

    /// Requests a rollback to `height`. Applied before the next scan
    /// iteration, and only when `height` is below the current position.
    pub async fn rollback(&self, height: u64) -> Result<(), ScannerError> {
        self.rollback_tx
            .send(RollbackRequest::ToHeight(height))
            .await
            .map_err(|_| ScannerError::SinkClosed("rollback"))
    }

    /// Requests a rollback behind the consensus chain's last observed
    /// height, the recovery path for a node that fell behind consensus.
    pub async fn rollback_to_last_observed(&self) -> Result<(), ScannerError> {
        self.rollback_tx
            .send(RollbackRequest::ToLastObserved)
            .await
            .map_err(|_| ScannerError::SinkClosed("rollback"))
    }

    /// Signals both loops to stop after their current iteration.
    pub fn stop(&self) {
        self.cancellation.cancel();
    }
}

/// Join handles for a started scanner. The caller must [`Self::wait`] for
/// both loops to exit before treating the scanner as stopped; only then is
/// the persisted scan position consistent.
#[derive(Debug)]
pub struct ScannerHandles {
    /// The chain-tip scan loop.
    pub scan: JoinHandle<()>,
    /// The mempool loop, when enabled.
    pub mem_pool: Option<JoinHandle<()>>,
}

impl ScannerHandles {
    /// Waits for both loops to fully exit.
    pub async fn wait(self) {
        let _ = self.scan.await;
        if let Some(mem_pool) = self.mem_pool {
            let _ = mem_pool.await;
        }
    }
}

/// The generic block-observation engine for one chain.
///
/// Owns two independent polling loops: the chain-tip scan loop, which
/// drives block fetching, reorg recovery, fee and solvency reporting, and
/// the mempool loop, which keeps forwarding unconfirmed outbound-relevant
/// transactions even while the chain is administratively halted.
#[derive(Debug)]
pub struct BlockScanner<F, B, R, S> {
    cfg: ScannerConfig,
    fetcher: Arc<F>,
    bridge: Arc<B>,
    position: PositionStore,
    ledger: BlockMetaLedger,
    reorg: ReorgMonitor<R>,
    fees: Arc<FeeAggregator>,
    solvency: SolvencyReporter<B, S>,
    halt: HaltChecker<B>,
    sinks: ScannerSinks,
    state: Arc<ScannerState>,
    mem_pool_seen: Arc<Mutex<HashSet<String>>>,
    cancellation: CancellationToken,
    rollback_tx: mpsc::Sender<RollbackRequest>,
    rollback_rx: mpsc::Receiver<RollbackRequest>,
}

impl<F, B, R, S> BlockScanner<F, B, R, S>
where
    F: ChainFetcher + 'static,
    B: ConsensusBridge + 'static,
    R: ReplaySource + 'static,
    S: BalanceSource + 'static,
{
    /// Creates a new scanner. Fails fast on invalid configuration; no
    /// loops are started yet.
    pub fn new(
        cfg: ScannerConfig,
        fetcher: Arc<F>,
        bridge: Arc<B>,
        replay: Arc<R>,
        balances: Arc<S>,
        db: Arc<dyn KeyValueStore>,
        sinks: ScannerSinks,
    ) -> Result<Self, ScannerError> {
        cfg.validate()?;
        let position = PositionStore::new(cfg.chain.clone(), db.clone());
        let ledger = BlockMetaLedger::new(cfg.chain.clone(), db);
        let reorg = ReorgMonitor::new(
            cfg.chain.clone(),
            ledger.clone(),
            replay,
            sinks.clone(),
            cfg.max_reorg_rescan_blocks,
        );
        let fees = Arc::new(FeeAggregator::new(
            cfg.fee_policy,
            cfg.gas_price_resolution,
            cfg.gas_cache_blocks,
        ));
        let solvency =
            SolvencyReporter::new(cfg.chain.clone(), bridge.clone(), balances, sinks.clone());
        let halt = HaltChecker::new(cfg.chain.clone(), bridge.clone(), cfg.chain_block_time);
        let (rollback_tx, rollback_rx) = mpsc::channel(16);

        Ok(Self {
            cfg,
            fetcher,
            bridge,
            position,
            ledger,
            reorg,
            fees,
            solvency,
            halt,
            sinks,
            state: Arc::new(ScannerState::default()),
            mem_pool_seen: Arc::new(Mutex::new(HashSet::new())),
            cancellation: CancellationToken::new(),
            rollback_tx,
            rollback_rx,
        })
    }

    /// Returns a control handle for the scanner.
    pub fn handle(&self) -> ScannerHandle {
        ScannerHandle {
            state: self.state.clone(),
            rollback_tx: self.rollback_tx.clone(),
            cancellation: self.cancellation.clone(),
        }
    }

    /// Spawns the scan loop and, when enabled, the mempool loop.
    pub fn start(self) -> ScannerHandles {
        let mem_pool = self.cfg.scan_mem_pool.then(|| {
            tokio::spawn(Self::mem_pool_loop(
                self.cfg.clone(),
                self.fetcher.clone(),
                self.sinks.clone(),
                self.state.clone(),
                self.mem_pool_seen.clone(),
                self.cancellation.clone(),
            ))
        });
        let scan = tokio::spawn(self.scan_loop());
        ScannerHandles { scan, mem_pool }
    }

    /// Discovers the height scanning should start from.
    ///
    /// In priority order: the configured start height verbatim; the
    /// consensus chain's view (resuming locally only while the local
    /// position is close enough); the local persisted position; the
    /// chain's own tip.
    pub async fn fetch_last_height(&self) -> Result<u64, ScannerError> {
        if let Some(height) = self.cfg.start_block_height {
            return Ok(height);
        }

        if let Err(err) = self.bridge.wait_to_catch_up().await {
            warn!(target: "block_scanner", chain = %self.cfg.chain, %err, "consensus catch-up wait failed");
        }
        let consensus_height = if self.cfg.is_consensus_chain {
            self.bridge.get_block_height().await
        } else {
            self.bridge.get_last_observed_in_height(&self.cfg.chain).await
        };

        let local = self.position.get_scan_pos()?;
        match consensus_height {
            Ok(height) if height > 0 => {
                let max_lag = self.cfg.max_resume_blocks();
                if local > 0 && height.saturating_sub(local) <= max_lag {
                    Ok(local)
                } else {
                    Ok(height.saturating_sub(max_lag))
                }
            }
            Ok(_) => self.local_or_chain_height(local).await,
            Err(err) => {
                debug!(target: "block_scanner", chain = %self.cfg.chain, %err, "no consensus height available");
                self.local_or_chain_height(local).await
            }
        }
    }

    async fn local_or_chain_height(&self, local: u64) -> Result<u64, ScannerError> {
        if local > 0 {
            return Ok(local);
        }
        Ok(self.fetcher.get_height().await?)
    }

    async fn scan_loop(mut self) {
        let start_height = loop {
            if self.cancellation.is_cancelled() {
                return;
            }
            match self.fetch_last_height().await {
                Ok(height) => break height,
                Err(err) => {
                    error!(
                        target: "block_scanner",
                        chain = %self.cfg.chain,
                        %err,
                        "failed to discover start height"
                    );
                    if idle(&self.cancellation, self.cfg.block_height_discover_backoff).await {
                        return;
                    }
                }
            }
        };
        self.state.previous_height.store(start_height, Ordering::SeqCst);
        info!(
            target: "block_scanner",
            chain = %self.cfg.chain,
            height = start_height,
            "starting block scan"
        );

        let mut last_progress = Instant::now();
        loop {
            if self.cancellation.is_cancelled() {
                break;
            }
            self.drain_rollbacks().await;
            let current = self.state.previous_height.load(Ordering::SeqCst) + 1;

            if self.halt.is_chain_paused().await {
                self.state.healthy.store(false, Ordering::SeqCst);
                if idle(&self.cancellation, self.cfg.block_height_discover_backoff).await {
                    break;
                }
                continue;
            }

            let tip = match self.fetcher.get_height().await {
                Ok(tip) => tip,
                Err(err) => {
                    warn!(target: "block_scanner", chain = %self.cfg.chain, %err, "failed to fetch chain tip");
                    self.note_fetch_error();
                    if idle(&self.cancellation, self.cfg.block_height_discover_backoff).await {
                        break;
                    }
                    continue;
                }
            };
            if tip < current {
                if idle(&self.cancellation, self.cfg.block_height_discover_backoff).await {
                    break;
                }
                continue;
            }

            let observed = match self.fetcher.fetch_txs(current, tip).await {
                Ok(observed) => observed,
                Err(FetchError::BlockNotAvailable(_)) => {
                    // The chain reports a tip it cannot serve yet. Soft
                    // retry, no log.
                    if idle(&self.cancellation, self.cfg.block_height_discover_backoff).await {
                        break;
                    }
                    continue;
                }
                Err(err @ FetchError::Malformed(_)) => {
                    // Retrying a block the fetcher cannot interpret would
                    // stall the chain forever. Skip it.
                    error!(
                        target: "block_scanner",
                        chain = %self.cfg.chain,
                        height = current,
                        %err,
                        "skipping malformed block"
                    );
                    self.state.previous_height.store(current, Ordering::SeqCst);
                    if let Err(err) = self.position.set_scan_pos(current) {
                        error!(target: "block_scanner", chain = %self.cfg.chain, %err, "failed to persist scan position");
                    }
                    continue;
                }
                Err(err) => {
                    warn!(
                        target: "block_scanner",
                        chain = %self.cfg.chain,
                        height = current,
                        %err,
                        "failed to fetch block"
                    );
                    self.note_fetch_error();
                    if idle(&self.cancellation, self.cfg.block_height_discover_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(err) = self.process_block(current, tip, observed, &mut last_progress).await
            {
                // Only a closed downstream sink lands here; the node is
                // shutting down around us.
                error!(target: "block_scanner", chain = %self.cfg.chain, %err, "stopping scan loop");
                break;
            }
        }
        info!(target: "block_scanner", chain = %self.cfg.chain, "block scan stopped");
    }

    async fn process_block(
        &self,
        current: u64,
        tip: u64,
        observed: ObservedBlock,
        last_progress: &mut Instant,
    ) -> Result<(), ScannerError> {
        match self.reorg.process_block(&observed.meta).await {
            Ok(rescans) => {
                for height in rescans {
                    self.rescan(height, tip).await?;
                }
            }
            Err(err) => {
                warn!(
                    target: "block_scanner",
                    chain = %self.cfg.chain,
                    height = current,
                    %err,
                    "reorg handling failed, continuing"
                );
            }
        }

        self.forward_block(&observed.tx_in).await?;

        let lag = tip.saturating_sub(current);
        let lag_duration = self
            .cfg
            .chain_block_time
            .saturating_mul(u32::try_from(lag).unwrap_or(u32::MAX));
        let healthy = lag <= MAX_HEALTHY_LAG_BLOCKS || lag_duration < self.cfg.max_healthy_lag;
        self.state.healthy.store(healthy, Ordering::SeqCst);

        // Fee and solvency side effects only make sense near the tip;
        // during catch-up they would report stale data.
        if lag <= self.cfg.observation_flexibility_blocks {
            self.observe_fees(current).await;
            self.check_solvency(current).await;
        }

        self.state.previous_height.store(current, Ordering::SeqCst);
        if let Err(err) = self.position.set_scan_pos(current) {
            // Best effort: halting the scan on a storage error would be
            // the larger liveness risk.
            error!(target: "block_scanner", chain = %self.cfg.chain, %err, "failed to persist scan position");
        }

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(crate::metrics::Metrics::BLOCKS_PROCESSED, "chain" => self.cfg.chain.to_string())
                .increment(1);
            metrics::gauge!(crate::metrics::Metrics::SCAN_LAG, "chain" => self.cfg.chain.to_string())
                .set(lag as f64);
        }

        if last_progress.elapsed() >= PROGRESS_LOG_INTERVAL {
            info!(
                target: "block_scanner",
                chain = %self.cfg.chain,
                height = current,
                tip,
                txs = observed.tx_in.count(),
                "scan progress"
            );
            *last_progress = Instant::now();
        }
        Ok(())
    }

    /// Re-fetches a height whose retained block was replaced by a reorg.
    async fn rescan(&self, height: u64, tip: u64) -> Result<(), ScannerError> {
        info!(target: "block_scanner", chain = %self.cfg.chain, height, "rescanning reorged height");
        match self.fetcher.fetch_txs(height, tip).await {
            Ok(observed) => {
                if let Err(err) = self.ledger.save(&observed.meta) {
                    error!(target: "block_scanner", chain = %self.cfg.chain, height, %err, "failed to persist rescanned block meta");
                }
                self.forward_block(&observed.tx_in).await
            }
            Err(err) => {
                warn!(
                    target: "block_scanner",
                    chain = %self.cfg.chain,
                    height,
                    %err,
                    "rescan failed, keeping retained record"
                );
                Ok(())
            }
        }
    }

    /// Hands a block's transactions to the inbound sink, feeding the fee
    /// window under the mean policy and releasing confirmed hashes from the
    /// mempool dedup set on the way.
    async fn forward_block(&self, tx_in: &TxIn) -> Result<(), ScannerError> {
        if tx_in.is_empty() {
            return Ok(());
        }

        if self.cfg.fee_policy == FeePolicy::Mean {
            for item in &tx_in.tx_items {
                let fee = item.gas.iter().fold(U256::ZERO, |acc, coin| acc + coin.amount);
                if !fee.is_zero() {
                    self.fees.record(fee).await;
                }
            }
        }

        {
            let mut seen = self.mem_pool_seen.lock().await;
            for item in &tx_in.tx_items {
                seen.remove(&item.tx_hash);
            }
        }

        self.sinks.push_tx_in(tx_in.clone()).await
    }

    async fn observe_fees(&self, current: u64) {
        match self.cfg.fee_policy {
            FeePolicy::Statistical => {
                match self.fetcher.get_network_fee().await {
                    Ok((size, rate)) => {
                        self.fees.set_tx_size(size);
                        self.fees.record(rate).await;
                    }
                    Err(err) => {
                        debug!(target: "fee_aggregator", chain = %self.cfg.chain, %err, "failed to fetch network fee");
                    }
                }
                self.publish_fee(current, false).await;
            }
            FeePolicy::Mean => {
                if current % self.cfg.fee_report_blocks == 0 {
                    self.publish_fee(current, false).await;
                }
            }
        }

        if current % self.cfg.blocks_per_day() == 0 {
            self.heartbeat_fee(current).await;
        }
    }

    async fn publish_fee(&self, height: u64, force: bool) {
        if !self.state.healthy.load(Ordering::SeqCst) {
            return;
        }
        if let Some(rate) = self.fees.take_report(force).await {
            info!(
                target: "fee_aggregator",
                chain = %self.cfg.chain,
                height,
                %rate,
                "reporting network fee"
            );
            let fee = NetworkFee {
                chain: self.cfg.chain.clone(),
                height,
                transaction_size: self.fees.tx_size(),
                transaction_rate: rate,
            };
            self.sinks.push_network_fee(fee).await;
        }
    }

    /// The once-per-day liveness heartbeat: re-publishes the current fee
    /// even when unchanged, logging when the consensus chain's published
    /// value has drifted from the local estimate.
    async fn heartbeat_fee(&self, height: u64) {
        let Some(local) = self.fees.current_fee().await else {
            return;
        };
        if let Ok((_, published)) = self.bridge.get_network_fee(&self.cfg.chain).await {
            if published != local {
                info!(
                    target: "fee_aggregator",
                    chain = %self.cfg.chain,
                    %published,
                    %local,
                    "published fee diverged from local estimate"
                );
            }
        }
        self.publish_fee(height, true).await;
    }

    async fn check_solvency(&self, height: u64) {
        if self.cfg.solvency_check_blocks == 0 || height % self.cfg.solvency_check_blocks != 0 {
            return;
        }
        // No verdict without a fee baseline; early snapshots would be
        // false positives.
        let Some(baseline) = self.fees.baseline().await else {
            return;
        };
        if baseline.is_zero() {
            return;
        }
        let healthy = self.state.healthy.load(Ordering::SeqCst);
        if let Err(err) = self.solvency.report(height, healthy).await {
            warn!(target: "solvency_reporter", chain = %self.cfg.chain, %err, "solvency pass failed");
        }
    }

    async fn drain_rollbacks(&mut self) {
        while let Ok(request) = self.rollback_rx.try_recv() {
            match request {
                RollbackRequest::ToHeight(height) => self.apply_rollback(height),
                RollbackRequest::ToLastObserved => {
                    match self.bridge.get_last_observed_in_height(&self.cfg.chain).await {
                        Ok(last_observed) => {
                            let window = self
                                .cfg
                                .observation_flexibility_blocks
                                .max(self.cfg.max_confirmations);
                            self.apply_rollback(last_observed.saturating_sub(window));
                        }
                        Err(err) => {
                            warn!(
                                target: "block_scanner",
                                chain = %self.cfg.chain,
                                %err,
                                "cannot resolve last observed height for rollback"
                            );
                        }
                    }
                }
            }
        }
    }

    fn apply_rollback(&self, target: u64) {
        let current = self.state.previous_height.load(Ordering::SeqCst);
        if current <= target {
            debug!(
                target: "block_scanner",
                chain = %self.cfg.chain,
                current,
                requested = target,
                "rollback is a no-op"
            );
            return;
        }
        warn!(
            target: "block_scanner",
            chain = %self.cfg.chain,
            from = current,
            to = target,
            "rolling back scan position"
        );
        self.state.previous_height.store(target, Ordering::SeqCst);
        if let Err(err) = self.position.set_scan_pos(target) {
            error!(target: "block_scanner", chain = %self.cfg.chain, %err, "failed to persist rollback");
        }
    }

    fn note_fetch_error(&self) {
        self.state.healthy.store(false, Ordering::SeqCst);
        #[cfg(feature = "metrics")]
        metrics::counter!(crate::metrics::Metrics::FETCH_ERRORS, "chain" => self.cfg.chain.to_string())
            .increment(1);
    }

    /// The mempool loop. Independent of the scan loop on purpose: outbound
    /// transactions must remain observable even while the chain is
    /// administratively halted.
    async fn mem_pool_loop(
        cfg: ScannerConfig,
        fetcher: Arc<F>,
        sinks: ScannerSinks,
        state: Arc<ScannerState>,
        seen: Arc<Mutex<HashSet<String>>>,
        cancellation: CancellationToken,
    ) {
        info!(target: "mempool_scanner", chain = %cfg.chain, "starting mempool scan");
        loop {
            if cancellation.is_cancelled() {
                break;
            }
            let next = state.previous_height.load(Ordering::SeqCst) + 1;
            match fetcher.fetch_mem_pool(next).await {
                Ok(tx_in) if !tx_in.is_empty() => {
                    let fresh = {
                        let mut seen = seen.lock().await;
                        tx_in
                            .tx_items
                            .into_iter()
                            .filter(|item| seen.insert(item.tx_hash.clone()))
                            .collect::<Vec<_>>()
                    };
                    if fresh.is_empty() {
                        if idle(&cancellation, cfg.block_height_discover_backoff).await {
                            break;
                        }
                        continue;
                    }
                    let batch = TxIn::new_mem_pool(tx_in.chain, fresh);
                    if sinks.push_tx_in(batch).await.is_err() {
                        error!(target: "mempool_scanner", chain = %cfg.chain, "inbound sink closed, stopping");
                        break;
                    }
                }
                Ok(_) => {
                    if idle(&cancellation, cfg.block_height_discover_backoff).await {
                        break;
                    }
                }
                Err(err) => {
                    debug!(target: "mempool_scanner", chain = %cfg.chain, %err, "mempool fetch failed");
                    if idle(&cancellation, cfg.block_height_discover_backoff).await {
                        break;
                    }
                }
            }
        }
        info!(target: "mempool_scanner", chain = %cfg.chain, "mempool scan stopped");
    }
}

/// Sleeps for `duration` unless cancelled first; returns true when
/// cancelled.
async fn idle(cancellation: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancellation.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BridgeError, MockBalanceSource, MockChainFetcher, MockConsensusBridge, MockReplaySource,
    };
    use vigil_store::MemoryStore;
    use vigil_types::{BlockMeta, Chain, ErrataBlock, Solvency, TxInItem};

    type TestScanner =
        BlockScanner<MockChainFetcher, MockConsensusBridge, MockReplaySource, MockBalanceSource>;

    struct SinkEnds {
        tx_in: mpsc::Receiver<TxIn>,
        #[allow(dead_code)]
        network_fee: mpsc::Receiver<NetworkFee>,
        #[allow(dead_code)]
        errata: mpsc::Receiver<ErrataBlock>,
        #[allow(dead_code)]
        solvency: mpsc::Receiver<Solvency>,
    }

    fn test_sinks() -> (ScannerSinks, SinkEnds) {
        let (tx_in, tx_in_rx) = mpsc::channel(32);
        let (network_fee, network_fee_rx) = mpsc::channel(32);
        let (errata, errata_rx) = mpsc::channel(32);
        let (solvency, solvency_rx) = mpsc::channel(32);
        (
            ScannerSinks::new(tx_in, network_fee, errata, solvency, Duration::from_millis(50)),
            SinkEnds {
                tx_in: tx_in_rx,
                network_fee: network_fee_rx,
                errata: errata_rx,
                solvency: solvency_rx,
            },
        )
    }

    fn test_cfg() -> ScannerConfig {
        let mut cfg = ScannerConfig::new(Chain::new("ETH"));
        cfg.block_height_discover_backoff = Duration::from_millis(10);
        cfg.chain_block_time = Duration::from_millis(50);
        cfg
    }

    fn build(
        cfg: ScannerConfig,
        fetcher: MockChainFetcher,
        bridge: MockConsensusBridge,
        db: Arc<dyn KeyValueStore>,
    ) -> (TestScanner, SinkEnds) {
        let (sinks, ends) = test_sinks();
        let scanner = BlockScanner::new(
            cfg,
            Arc::new(fetcher),
            Arc::new(bridge),
            Arc::new(MockReplaySource::new()),
            Arc::new(MockBalanceSource::new()),
            db,
            sinks,
        )
        .unwrap();
        (scanner, ends)
    }

    fn observed(height: u64, hash: &str, parent: &str, tx_hashes: &[&str]) -> ObservedBlock {
        let mut meta = BlockMeta::new(height, hash, parent);
        let items = tx_hashes
            .iter()
            .map(|tx_hash| {
                meta.add_transaction(*tx_hash);
                TxInItem {
                    tx_hash: tx_hash.to_string(),
                    block_height: height,
                    ..Default::default()
                }
            })
            .collect();
        ObservedBlock::new(meta, TxIn::new(Chain::new("ETH"), items))
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn configured_start_height_wins_over_everything() {
        let mut cfg = test_cfg();
        cfg.start_block_height = Some(1);

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_wait_to_catch_up().returning(|| Ok(()));
        bridge.expect_get_last_observed_in_height().returning(|_| Ok(500));

        let (scanner, _ends) =
            build(cfg, MockChainFetcher::new(), bridge, Arc::new(MemoryStore::new()));
        assert_eq!(scanner.fetch_last_height().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn startup_jumps_forward_when_local_position_lags_consensus() {
        let mut cfg = test_cfg();
        cfg.chain_block_time = Duration::from_secs(6);
        cfg.max_resume_block_lag = Duration::from_secs(600); // 100 blocks

        let db: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        PositionStore::new(cfg.chain.clone(), db.clone()).set_scan_pos(50).unwrap();

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_wait_to_catch_up().returning(|| Ok(()));
        bridge.expect_get_last_observed_in_height().returning(|_| Ok(200));

        let (scanner, _ends) = build(cfg, MockChainFetcher::new(), bridge, db);
        assert_eq!(scanner.fetch_last_height().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn startup_resumes_locally_when_close_to_consensus() {
        let mut cfg = test_cfg();
        cfg.chain_block_time = Duration::from_secs(6);
        cfg.max_resume_block_lag = Duration::from_secs(600);

        let db: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        PositionStore::new(cfg.chain.clone(), db.clone()).set_scan_pos(150).unwrap();

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_wait_to_catch_up().returning(|| Ok(()));
        bridge.expect_get_last_observed_in_height().returning(|_| Ok(200));

        let (scanner, _ends) = build(cfg, MockChainFetcher::new(), bridge, db);
        assert_eq!(scanner.fetch_last_height().await.unwrap(), 150);
    }

    #[tokio::test]
    async fn startup_falls_back_to_local_position_without_consensus() {
        let cfg = test_cfg();
        let db: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        PositionStore::new(cfg.chain.clone(), db.clone()).set_scan_pos(50).unwrap();

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_wait_to_catch_up().returning(|| Ok(()));
        bridge
            .expect_get_last_observed_in_height()
            .returning(|_| Err(BridgeError::Unavailable("down".into())));

        let (scanner, _ends) = build(cfg, MockChainFetcher::new(), bridge, db);
        assert_eq!(scanner.fetch_last_height().await.unwrap(), 50);
    }

    #[tokio::test]
    async fn startup_falls_back_to_chain_tip_when_nothing_is_known() {
        let cfg = test_cfg();

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_wait_to_catch_up().returning(|| Ok(()));
        bridge.expect_get_last_observed_in_height().returning(|_| Ok(0));

        let mut fetcher = MockChainFetcher::new();
        fetcher.expect_get_height().returning(|| Ok(777));

        let (scanner, _ends) = build(cfg, fetcher, bridge, Arc::new(MemoryStore::new()));
        assert_eq!(scanner.fetch_last_height().await.unwrap(), 777);
    }

    #[tokio::test]
    async fn consensus_chain_discovers_from_its_own_height() {
        let mut cfg = test_cfg();
        cfg.is_consensus_chain = true;
        cfg.chain_block_time = Duration::from_secs(6);
        cfg.max_resume_block_lag = Duration::from_secs(600);

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_wait_to_catch_up().returning(|| Ok(()));
        bridge.expect_get_block_height().returning(|| Ok(300));

        let (scanner, _ends) =
            build(cfg, MockChainFetcher::new(), bridge, Arc::new(MemoryStore::new()));
        assert_eq!(scanner.fetch_last_height().await.unwrap(), 200);
    }

    #[tokio::test]
    async fn rollback_is_a_noop_at_or_below_the_current_position() {
        let (scanner, _ends) = build(
            test_cfg(),
            MockChainFetcher::new(),
            MockConsensusBridge::new(),
            Arc::new(MemoryStore::new()),
        );
        scanner.state.previous_height.store(100, Ordering::SeqCst);
        scanner.position.set_scan_pos(100).unwrap();

        scanner.apply_rollback(100);
        assert_eq!(scanner.state.previous_height.load(Ordering::SeqCst), 100);
        scanner.apply_rollback(150);
        assert_eq!(scanner.state.previous_height.load(Ordering::SeqCst), 100);

        scanner.apply_rollback(40);
        assert_eq!(scanner.state.previous_height.load(Ordering::SeqCst), 40);
        assert_eq!(scanner.position.get_scan_pos().unwrap(), 40);
    }

    #[tokio::test]
    async fn rollback_to_last_observed_applies_the_confirmation_window() {
        let mut cfg = test_cfg();
        cfg.observation_flexibility_blocks = 10;
        cfg.max_confirmations = 30;

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_get_last_observed_in_height().returning(|_| Ok(200));

        let (mut scanner, _ends) =
            build(cfg, MockChainFetcher::new(), bridge, Arc::new(MemoryStore::new()));
        scanner.state.previous_height.store(500, Ordering::SeqCst);

        let handle = scanner.handle();
        handle.rollback_to_last_observed().await.unwrap();
        scanner.drain_rollbacks().await;

        // 200 - max(10, 30)
        assert_eq!(scanner.state.previous_height.load(Ordering::SeqCst), 170);
    }

    #[tokio::test]
    async fn scan_loop_forwards_blocks_and_reports_healthy() {
        let mut cfg = test_cfg();
        cfg.start_block_height = Some(0);

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_get_block_height().returning(|| Ok(1_000));
        bridge.expect_get_mimir().returning(|_| Ok(0));

        let mut fetcher = MockChainFetcher::new();
        fetcher.expect_get_height().returning(|| Ok(2));
        fetcher.expect_get_network_fee().returning(|| Ok((21_000, U256::from(30u64))));
        fetcher.expect_fetch_txs().returning(|height, _| match height {
            1 => Ok(observed(1, "0xa1", "0xa0", &["0x01"])),
            2 => Ok(observed(2, "0xa2", "0xa1", &[])),
            _ => Err(FetchError::BlockNotAvailable(height)),
        });

        let db: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let (scanner, mut ends) = build(cfg.clone(), fetcher, bridge, db.clone());
        let handle = scanner.handle();
        let handles = scanner.start();

        let batch = tokio::time::timeout(Duration::from_secs(2), ends.tx_in.recv())
            .await
            .expect("tx_in batch in time")
            .expect("tx_in sink open");
        assert_eq!(batch.count(), 1);
        assert_eq!(batch.tx_items[0].tx_hash, "0x01");
        assert!(!batch.mem_pool);

        let state = handle.clone();
        wait_for(move || state.height() == 2).await;
        assert!(handle.is_healthy());

        handle.stop();
        handles.wait().await;

        // The position and both block metas survived the run.
        assert_eq!(PositionStore::new(cfg.chain.clone(), db.clone()).get_scan_pos().unwrap(), 2);
        let ledger = BlockMetaLedger::new(cfg.chain, db);
        assert!(ledger.get(1).unwrap().is_some());
        assert!(ledger.get(2).unwrap().is_some());
    }

    #[tokio::test]
    async fn disabled_mempool_never_fetches() {
        let mut cfg = test_cfg();
        cfg.start_block_height = Some(0);
        cfg.scan_mem_pool = false;

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_get_block_height().returning(|| Ok(1_000));
        bridge.expect_get_mimir().returning(|_| Ok(0));

        let mut fetcher = MockChainFetcher::new();
        fetcher.expect_fetch_mem_pool().times(0);
        fetcher.expect_get_height().returning(|| Ok(0));

        let (scanner, _ends) = build(cfg, fetcher, bridge, Arc::new(MemoryStore::new()));
        let handle = scanner.handle();
        let handles = scanner.start();
        assert!(handles.mem_pool.is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();
        handles.wait().await;
    }

    #[tokio::test]
    async fn mempool_loop_forwards_once_per_tx() {
        let mut cfg = test_cfg();
        cfg.start_block_height = Some(0);
        cfg.scan_mem_pool = true;

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_get_block_height().returning(|| Ok(1_000));
        bridge.expect_get_mimir().returning(|_| Ok(0));

        let mut fetcher = MockChainFetcher::new();
        fetcher.expect_get_height().returning(|| Ok(0));
        fetcher.expect_fetch_mem_pool().returning(|_| {
            Ok(TxIn::new_mem_pool(
                Chain::new("ETH"),
                vec![TxInItem { tx_hash: "0xm1".to_string(), ..Default::default() }],
            ))
        });

        let (scanner, mut ends) = build(cfg, fetcher, bridge, Arc::new(MemoryStore::new()));
        let handle = scanner.handle();
        let handles = scanner.start();

        let batch = tokio::time::timeout(Duration::from_secs(2), ends.tx_in.recv())
            .await
            .expect("mempool batch in time")
            .expect("tx_in sink open");
        assert!(batch.mem_pool);
        assert_eq!(batch.tx_items[0].tx_hash, "0xm1");

        // The same mempool tx keeps coming back from the fetcher but is
        // deduplicated away.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ends.tx_in.try_recv().is_err());

        handle.stop();
        handles.wait().await;
    }

    #[tokio::test]
    async fn malformed_blocks_are_skipped_not_retried() {
        let mut cfg = test_cfg();
        cfg.start_block_height = Some(0);

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_get_block_height().returning(|| Ok(1_000));
        bridge.expect_get_mimir().returning(|_| Ok(0));

        let mut fetcher = MockChainFetcher::new();
        fetcher.expect_get_height().returning(|| Ok(2));
        fetcher.expect_get_network_fee().returning(|| Ok((21_000, U256::from(30u64))));
        fetcher.expect_fetch_txs().returning(|height, _| match height {
            1 => Err(FetchError::Malformed("garbled header".into())),
            2 => Ok(observed(2, "0xa2", "0xa1", &["0x02"])),
            _ => Err(FetchError::BlockNotAvailable(height)),
        });

        let (scanner, mut ends) =
            build(cfg, fetcher, bridge, Arc::new(MemoryStore::new()));
        let handle = scanner.handle();
        let handles = scanner.start();

        let batch = tokio::time::timeout(Duration::from_secs(2), ends.tx_in.recv())
            .await
            .expect("tx_in batch in time")
            .expect("tx_in sink open");
        assert_eq!(batch.tx_items[0].tx_hash, "0x02");

        let state = handle.clone();
        wait_for(move || state.height() == 2).await;
        handle.stop();
        handles.wait().await;
    }

    #[tokio::test]
    async fn halted_chain_goes_unhealthy_without_advancing() {
        let mut cfg = test_cfg();
        cfg.start_block_height = Some(10);

        let mut bridge = MockConsensusBridge::new();
        bridge.expect_get_block_height().returning(|| Ok(100));
        bridge.expect_get_mimir().returning(|key| Ok(if key == "HaltGlobal" { 50 } else { 0 }));

        // No fetcher expectations: a halted scanner must not touch the
        // chain at all.
        let (scanner, _ends) = build(
            cfg,
            MockChainFetcher::new(),
            bridge,
            Arc::new(MemoryStore::new()),
        );
        let handle = scanner.handle();
        let handles = scanner.start();

        let state = handle.clone();
        wait_for(move || state.height() == 10).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handle.height(), 10);
        assert!(!handle.is_healthy());

        handle.stop();
        handles.wait().await;
    }
}
