//! Metric names for the observation engine.

/// Container for metric name constants.
#[derive(Debug)]
pub(crate) struct Metrics;

impl Metrics {
    /// Blocks successfully processed, per chain.
    pub(crate) const BLOCKS_PROCESSED: &'static str = "vigil_scanner_blocks_processed_total";
    /// Hard fetch failures, per chain.
    pub(crate) const FETCH_ERRORS: &'static str = "vigil_scanner_fetch_errors_total";
    /// Errata transactions emitted after reorg replay, per chain.
    pub(crate) const ERRATA_EMITTED: &'static str = "vigil_scanner_errata_emitted_total";
    /// Fee or solvency reports dropped at the sink, per kind.
    pub(crate) const REPORTS_DROPPED: &'static str = "vigil_scanner_reports_dropped_total";
    /// Current scan lag behind the chain tip, in blocks, per chain.
    pub(crate) const SCAN_LAG: &'static str = "vigil_scanner_lag_blocks";
}
