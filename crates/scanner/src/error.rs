use thiserror::Error;
use vigil_store::StoreError;

/// Errors returned by a [`crate::ChainFetcher`] or [`crate::ReplaySource`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// The requested block has not been produced yet. The scanner retries
    /// this silently.
    #[error("block {0} not yet available")]
    BlockNotAvailable(u64),

    /// A remote RPC call failed.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The remote returned data the fetcher could not interpret.
    #[error("malformed remote data: {0}")]
    Malformed(String),
}

/// Errors returned by the [`crate::ConsensusBridge`].
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A bridge RPC call failed.
    #[error("bridge rpc error: {0}")]
    Rpc(String),

    /// The consensus chain is not reachable or still catching up.
    #[error("bridge unavailable: {0}")]
    Unavailable(String),
}

/// The error type for the block scanner and its subsystems.
#[derive(Debug, Error)]
pub enum ScannerError {
    /// The scanner was constructed with an invalid configuration.
    #[error("invalid scanner configuration: {0}")]
    Config(String),

    /// A chain fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A consensus bridge call failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Persisted state could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A downstream sink was closed while the scanner was still running.
    #[error("sink channel closed: {0}")]
    SinkClosed(&'static str),
}
