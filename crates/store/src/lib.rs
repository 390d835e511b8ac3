//! Persisted state for the vigil observation engine.
//!
//! The engine's durable state is small and uniform: a scan position per
//! chain, a trailing window of block header records, and the set of already
//! signed outbound fingerprints. All of it lives in an abstract ordered
//! byte-store ([`KeyValueStore`]) so the durable backend stays swappable;
//! [`MemoryStore`] is the in-process implementation used by tests and by
//! nodes that delegate durability to an outer snapshotting layer.

mod error;
pub use error::StoreError;

mod kv;
pub use kv::{KeyValueStore, MemoryStore};

mod position;
pub use position::PositionStore;

mod block_meta;
pub use block_meta::BlockMetaLedger;

mod signer_cache;
pub use signer_cache::{SignerCache, SignerCacheEntry, fingerprint};
