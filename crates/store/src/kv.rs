//! The abstract ordered byte-store and its in-process implementation.

use crate::StoreError;
use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::RwLock,
};

/// An ordered byte-keyed store.
///
/// Implementations must order [`Self::scan_prefix`] results by key bytes;
/// the stores built on top rely on zero-padded height keys sorting
/// numerically.
pub trait KeyValueStore: Debug + Send + Sync {
    /// Returns the value stored under `key`, when present.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Removes the value stored under `key`. Removing an absent key is a
    /// no-op.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Returns all entries whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

/// A [`KeyValueStore`] backed by an in-process ordered map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty [`MemoryStore`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Backend("poisoned lock".into()))?;
        Ok(inner.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut inner =
            self.inner.write().map_err(|_| StoreError::Backend("poisoned lock".into()))?;
        inner.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut inner =
            self.inner.write().map_err(|_| StoreError::Backend("poisoned lock".into()))?;
        inner.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Backend("poisoned lock".into()))?;
        Ok(inner
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_prefix_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.put(b"a/1", b"one").unwrap();
        store.put(b"a/3", b"three").unwrap();
        store.put(b"a/2", b"two").unwrap();
        store.put(b"b/1", b"other").unwrap();

        let entries = store.scan_prefix(b"a/").unwrap();
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"a/1".as_slice(), b"a/2".as_slice(), b"a/3".as_slice()]);
    }

    #[test]
    fn delete_missing_key_is_noop() {
        let store = MemoryStore::new();
        assert!(store.delete(b"missing").is_ok());
        assert_eq!(store.get(b"missing").unwrap(), None);
    }
}
