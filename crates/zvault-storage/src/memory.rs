//! In-memory storage backend.
//!
//! Entries live in a `BTreeMap` behind a `RwLock`; nothing survives the
//! process. Sorted keys make one-level prefix listing a single range scan.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{Entry, StorageBackend, StorageError, fold_listing};

/// An in-memory storage backend backed by a `BTreeMap`.
///
/// Cloning shares the underlying map, which lets tests keep a handle on the
/// same storage that a seal manager writes to.
///
/// # Examples
///
/// ```
/// # use zvault_storage::{Entry, MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put(&Entry::new("core/keyring", b"data".to_vec())).await.unwrap();
/// let entry = backend.get("core/keyring").await.unwrap().unwrap();
/// assert_eq!(entry.value, b"data".to_vec());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the backend holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Entry>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(key).map(|value| Entry::new(key, value.clone())))
    }

    async fn put(&self, entry: &Entry) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.insert(entry.key.clone(), entry.value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        let keys = data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone());
        Ok(fold_listing(prefix, keys))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.read().await.contains_key(key))
    }
}
