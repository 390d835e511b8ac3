//! Durable scan positions.

use crate::{KeyValueStore, StoreError};
use std::sync::Arc;
use vigil_types::Chain;

/// The durable "last scanned height" for one chain, used for crash-safe
/// resume.
#[derive(Debug, Clone)]
pub struct PositionStore {
    chain: Chain,
    db: Arc<dyn KeyValueStore>,
}

impl PositionStore {
    /// Creates a new [`PositionStore`] scoped to `chain`.
    pub fn new(chain: Chain, db: Arc<dyn KeyValueStore>) -> Self {
        Self { chain, db }
    }

    fn key(&self) -> Vec<u8> {
        format!("scanpos/{}", self.chain).into_bytes()
    }

    /// Returns the persisted scan position, or zero when none has been
    /// recorded yet.
    pub fn get_scan_pos(&self) -> Result<u64, StoreError> {
        match self.db.get(&self.key())? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(0),
        }
    }

    /// Persists `height` as the last scanned height.
    pub fn set_scan_pos(&self, height: u64) -> Result<(), StoreError> {
        self.db.put(&self.key(), &serde_json::to_vec(&height)?)
    }
}
