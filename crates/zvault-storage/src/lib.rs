//! Physical storage abstraction for `ZVault`.
//!
//! This crate defines the [`StorageBackend`] trait — a pure key-value storage
//! interface over [`Entry`] records that knows nothing about seals, wrappers,
//! or encryption. The seal core writes a handful of entries at fixed paths
//! (stored barrier keys, the recovery key, the seal generation descriptor)
//! and the barrier encrypts everything else before it reaches this layer.
//!
//! Two implementations are provided:
//!
//! - [`MemoryBackend`] — in-memory, for tests and development
//! - [`RocksDbBackend`] — persistent, backed by `RocksDB` (feature `rocksdb-backend`)

mod error;
mod memory;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_backend::RocksDbBackend;

/// A single record in physical storage.
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    /// Slash-separated storage path, e.g. `core/hsm/barrier-unseal-keys`.
    pub key: String,
    /// Opaque value bytes.
    pub value: Vec<u8>,
}

impl Entry {
    /// Build an entry from a key and value.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values may hold wrapped key material; only the size is shown.
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("value_len", &self.value.len())
            .finish()
    }
}

/// A pluggable key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator. Values are opaque byte
/// arrays. Implementations must be safe to share across async tasks.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve an entry by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Entry>, StorageError>;

    /// Store an entry, overwriting any existing value at the same key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, entry: &Entry) -> Result<(), StorageError>;

    /// Delete a key. Deleting a non-existent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List the children of `prefix`, one level deep.
    ///
    /// Leaf keys are returned relative to the prefix; deeper keys are folded
    /// into their first path segment with a trailing `/`, each folder
    /// reported once.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Fold a sorted stream of full keys under `prefix` into a one-level listing.
pub(crate) fn fold_listing<I>(prefix: &str, keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: Vec<String> = Vec::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        let child = match rest.find('/') {
            Some(idx) => &rest[..=idx],
            None => rest,
        };
        if out.last().is_none_or(|last| last != child) {
            out.push(child.to_owned());
        }
    }
    out
}
