//! Key-value store adapter for the offline machine.
//!
//! The machine only needs byte-keyed get/put plus an atomic batch write; the
//! transaction object buffers puts and commits them in one step, so the
//! pub/priv/salt triple is always written under one committed view.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use sled::transaction::ConflictableTransactionError;
use thiserror::Error;

/// Store adapter error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Byte-keyed storage with atomic batch writes.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Apply every entry of the batch atomically.
    fn apply(&self, batch: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError>;
}

impl dyn KeyValueStore + '_ {
    /// Open a buffered transaction over this store.
    pub fn open_transaction(&self) -> StoreTransaction<'_> {
        StoreTransaction::new(self)
    }
}

/// A buffered write transaction. Dropping it without [`commit`] discards the
/// pending writes.
///
/// [`commit`]: StoreTransaction::commit
pub struct StoreTransaction<'a> {
    store: &'a dyn KeyValueStore,
    pending: Vec<(Vec<u8>, Vec<u8>)>,
}

impl<'a> StoreTransaction<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store, pending: Vec::new() }
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.pending.push((key.to_vec(), value.to_vec()));
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.store.apply(&self.pending)
    }

    pub fn discard(self) {}
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    inner: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn apply(&self, batch: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for (key, value) in batch {
            inner.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// Sled-backed store for the real offline machine.
pub struct SledKeyValueStore {
    db: sled::Db,
}

impl SledKeyValueStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Backend(format!("failed to open sled db: {e}")))?;
        Ok(Self { db })
    }
}

impl KeyValueStore for SledKeyValueStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.db
            .get(key)
            .map(|value| value.map(|ivec| ivec.to_vec()))
            .map_err(|e| StoreError::Backend(format!("failed to get: {e}")))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db
            .insert(key, value)
            .map_err(|e| StoreError::Backend(format!("failed to put: {e}")))?;
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(format!("failed to flush: {e}")))?;
        Ok(())
    }

    fn apply(&self, batch: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        self.db
            .transaction(|tx| {
                for (key, value) in batch {
                    tx.insert(key.as_slice(), value.as_slice())?;
                }
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(|e| StoreError::Backend(format!("transaction failed: {e:?}")))?;
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(format!("failed to flush: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise_store(store: &dyn KeyValueStore) {
        assert_eq!(store.get(b"missing").unwrap(), None);

        store.put(b"alpha", b"one").unwrap();
        assert_eq!(store.get(b"alpha").unwrap(), Some(b"one".to_vec()));

        let mut tx = store.open_transaction();
        tx.put(b"beta", b"two");
        tx.put(b"gamma", b"three");
        tx.commit().unwrap();
        assert_eq!(store.get(b"beta").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.get(b"gamma").unwrap(), Some(b"three".to_vec()));

        // A discarded transaction writes nothing.
        let mut tx = StoreTransaction::new(store);
        tx.put(b"delta", b"four");
        tx.discard();
        assert_eq!(store.get(b"delta").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryKeyValueStore::new());
    }

    #[test]
    fn test_sled_store() {
        let dir = tempdir().unwrap();
        exercise_store(&SledKeyValueStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_sled_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = SledKeyValueStore::open(dir.path()).unwrap();
            store.put(b"persisted", b"yes").unwrap();
        }
        let store = SledKeyValueStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"persisted").unwrap(), Some(b"yes".to_vec()));
    }
}
