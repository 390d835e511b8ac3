//! Bounded hand-off queues to the bridging core.

use crate::ScannerError;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;
use vigil_types::{ErrataBlock, NetworkFee, Solvency, TxIn};

/// The downstream sinks a scanner delivers into.
///
/// Inbound observations and errata block until the consumer accepts them:
/// losing either is unacceptable. Fee and solvency reports instead wait at
/// most `push_timeout` (one nominal block interval) and are dropped when
/// the consumer is not draining, so a slow consensus chain can never stall
/// the scan loop.
#[derive(Debug, Clone)]
pub struct ScannerSinks {
    tx_in: mpsc::Sender<TxIn>,
    network_fee: mpsc::Sender<NetworkFee>,
    errata: mpsc::Sender<ErrataBlock>,
    solvency: mpsc::Sender<Solvency>,
    push_timeout: Duration,
}

impl ScannerSinks {
    /// Creates a new sink bundle.
    pub const fn new(
        tx_in: mpsc::Sender<TxIn>,
        network_fee: mpsc::Sender<NetworkFee>,
        errata: mpsc::Sender<ErrataBlock>,
        solvency: mpsc::Sender<Solvency>,
        push_timeout: Duration,
    ) -> Self {
        Self { tx_in, network_fee, errata, solvency, push_timeout }
    }

    pub(crate) async fn push_tx_in(&self, tx_in: TxIn) -> Result<(), ScannerError> {
        self.tx_in.send(tx_in).await.map_err(|_| ScannerError::SinkClosed("tx_in"))
    }

    pub(crate) async fn push_errata(&self, errata: ErrataBlock) -> Result<(), ScannerError> {
        self.errata.send(errata).await.map_err(|_| ScannerError::SinkClosed("errata"))
    }

    /// Returns true when the report was delivered.
    pub(crate) async fn push_network_fee(&self, fee: NetworkFee) -> bool {
        match self.network_fee.send_timeout(fee, self.push_timeout).await {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "block_scanner", %err, "dropping network fee report");
                #[cfg(feature = "metrics")]
                metrics::counter!(crate::metrics::Metrics::REPORTS_DROPPED, "kind" => "network_fee")
                    .increment(1);
                false
            }
        }
    }

    /// Returns true when the report was delivered.
    pub(crate) async fn push_solvency(&self, solvency: Solvency) -> bool {
        match self.solvency.send_timeout(solvency, self.push_timeout).await {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "solvency_reporter", %err, "dropping solvency report");
                #[cfg(feature = "metrics")]
                metrics::counter!(crate::metrics::Metrics::REPORTS_DROPPED, "kind" => "solvency")
                    .increment(1);
                false
            }
        }
    }
}
