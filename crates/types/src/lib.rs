//! Core value types shared across the vigil observation engine.
//!
//! Everything here is chain-agnostic: identifiers, addresses and hashes are
//! strings so that hex, bech32 and base58 encodings all flow through the
//! engine unchanged, and amounts are 256-bit unsigned integers.

mod chain;
pub use chain::Chain;

mod coin;
pub use coin::{Asset, Coin, Coins};

mod tx;
pub use tx::{TxIn, TxInItem};

mod block_meta;
pub use block_meta::{BlockMeta, TrackedTx};

mod fee;
pub use fee::NetworkFee;

mod solvency;
pub use solvency::Solvency;

mod errata;
pub use errata::{ErrataBlock, ErrataTx};

mod status;
pub use status::TxStatus;

mod vault;
pub use vault::Vault;
