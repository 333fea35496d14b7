use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use uuid::Uuid;

use super::{AssetStore, StoreError, StoredAsset};

/// In-process [`AssetStore`] that keeps assets in a map and counts calls.
#[derive(Debug, Default)]
pub struct MemoryStore {
    assets: Mutex<HashMap<String, Vec<u8>>>,
    store_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    bytes_received: AtomicUsize,
    fail_stores: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `store` call fail.
    pub fn fail_stores(&self, fail: bool) {
        self.fail_stores.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `delete` call fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.assets.lock().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.assets.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.assets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.lock().is_empty()
    }

    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Total payload bytes handed to `store`, failed calls included.
    pub fn bytes_received(&self) -> usize {
        self.bytes_received.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AssetStore for MemoryStore {
    async fn store(&self, bytes: &[u8], folder: &str) -> Result<StoredAsset, StoreError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        self.bytes_received.fetch_add(bytes.len(), Ordering::SeqCst);
        if self.fail_stores.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store configured to fail".into()));
        }
        let id = format!("{folder}/{}", Uuid::new_v4().simple());
        let url = format!("memory://{id}");
        self.assets.lock().insert(id.clone(), bytes.to_vec());
        Ok(StoredAsset { id, url })
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store configured to fail".into()));
        }
        self.assets.lock().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_delete() {
        let store = MemoryStore::new();
        let asset = store.store(b"abc", "temp_uploads").await.unwrap();
        assert!(asset.id.starts_with("temp_uploads/"));
        assert_eq!(store.get(&asset.id).as_deref(), Some(&b"abc"[..]));

        store.delete(&asset.id).await.unwrap();
        assert!(!store.contains(&asset.id));
        // Idempotent.
        store.delete(&asset.id).await.unwrap();
        assert_eq!(store.delete_calls(), 2);
    }

    #[tokio::test]
    async fn failing_store_counts_but_keeps_nothing() {
        let store = MemoryStore::new();
        store.fail_stores(true);
        assert!(store.store(b"xyz", "f").await.is_err());
        assert_eq!(store.store_calls(), 1);
        assert!(store.is_empty());
    }
}
