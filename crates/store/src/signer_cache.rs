//! The persisted signing-deduplication cache.

use crate::{KeyValueStore, StoreError};
use alloy_primitives::hex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use vigil_types::Chain;

/// A persisted "already signed" record.
///
/// The fingerprint excludes the vault key, so a record is chain-wide unique
/// per logical payout regardless of which vault ultimately signed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerCacheEntry {
    /// The payout fingerprint.
    pub fingerprint: String,
    /// The vault scope the payout was signed under.
    pub vault_scope_key: String,
    /// The hash of the broadcast transaction.
    pub recorded_tx_hash: String,
}

/// The persisted set of already-signed payout fingerprints for one chain.
///
/// An entry is written only after a successful broadcast, never before: a
/// crash between signing and broadcasting must leave the cache empty so the
/// payout is retried exactly once rather than silently dropped.
#[derive(Debug, Clone)]
pub struct SignerCache {
    chain: Chain,
    db: Arc<dyn KeyValueStore>,
}

impl SignerCache {
    /// Creates a new [`SignerCache`] scoped to `chain`.
    pub fn new(chain: Chain, db: Arc<dyn KeyValueStore>) -> Self {
        Self { chain, db }
    }

    fn entry_key(&self, fingerprint: &str) -> Vec<u8> {
        format!("signed/{}/{fingerprint}", self.chain).into_bytes()
    }

    // Reverse index so a record can be dropped by its broadcast hash.
    fn tx_key(&self, tx_hash: &str) -> Vec<u8> {
        format!("signed-tx/{}/{tx_hash}", self.chain).into_bytes()
    }

    fn latest_key(&self, scope: &str) -> Vec<u8> {
        format!("latest-record/{}/{scope}", self.chain).into_bytes()
    }

    /// Whether a payout with `fingerprint` has already been signed and
    /// broadcast.
    pub fn has_signed(&self, fingerprint: &str) -> Result<bool, StoreError> {
        Ok(self.db.get(&self.entry_key(fingerprint))?.is_some())
    }

    /// Records a successful broadcast for `fingerprint`.
    pub fn set_signed(
        &self,
        fingerprint: &str,
        vault_scope_key: &str,
        recorded_tx_hash: &str,
    ) -> Result<(), StoreError> {
        let entry = SignerCacheEntry {
            fingerprint: fingerprint.to_string(),
            vault_scope_key: vault_scope_key.to_string(),
            recorded_tx_hash: recorded_tx_hash.to_string(),
        };
        self.db.put(&self.entry_key(fingerprint), &serde_json::to_vec(&entry)?)?;
        self.db.put(&self.tx_key(recorded_tx_hash), &serde_json::to_vec(&entry.fingerprint)?)?;
        self.db.put(
            &self.latest_key(vault_scope_key),
            &serde_json::to_vec(&entry.recorded_tx_hash)?,
        )
    }

    /// Removes the record that produced `recorded_tx_hash`, allowing the
    /// payout to be rescheduled after a proven on-chain failure.
    pub fn remove_signed(&self, recorded_tx_hash: &str) -> Result<(), StoreError> {
        let tx_key = self.tx_key(recorded_tx_hash);
        let Some(raw) = self.db.get(&tx_key)? else {
            return Ok(());
        };
        let fingerprint: String = serde_json::from_slice(&raw)?;
        self.db.delete(&self.entry_key(&fingerprint))?;
        self.db.delete(&tx_key)
    }

    /// Returns the most recently recorded broadcast hash for a vault scope,
    /// when one exists.
    pub fn get_latest_recorded_tx(&self, scope: &str) -> Result<Option<String>, StoreError> {
        match self.db.get(&self.latest_key(scope))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Computes a payout fingerprint over the given parts.
///
/// The vault key must not be among the parts: the fingerprint identifies
/// the logical payout independently of which vault signs it.
pub fn fingerprint<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}
