//! Encryption barrier for `ZVault`.
//!
//! Everything above the seal layer reads and writes through the barrier,
//! which encrypts values with the barrier key before they reach the storage
//! backend. The barrier key itself is one of the stored barrier keys that the
//! seal unwraps during unseal.
//!
//! When the vault is sealed, the barrier rejects all operations with
//! [`BarrierError::Sealed`].
//!
//! # Security model
//!
//! - The barrier key lives only in process memory, never on disk in plaintext.
//! - All values are encrypted with AES-256-GCM (fresh nonce per write) and
//!   bound to their storage path as associated data, so a ciphertext copied
//!   to another path does not decrypt.
//! - Paths are stored in plaintext to support prefix listing.
//! - Sealing drops the key, which zeroizes it.

use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use zvault_storage::{Entry, StorageBackend};

use crate::crypto::{self, EncryptionKey};
use crate::error::BarrierError;

/// The encryption barrier wrapping a storage backend.
pub struct Barrier {
    storage: Arc<dyn StorageBackend>,
    key: RwLock<Option<EncryptionKey>>,
}

impl Barrier {
    /// Create a new sealed barrier wrapping the given storage backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            key: RwLock::new(None),
        }
    }

    /// Unseal the barrier with the barrier key.
    pub async fn unseal(&self, key: EncryptionKey) {
        *self.key.write().await = Some(key);
    }

    /// Seal the barrier, dropping (and zeroizing) the key.
    pub async fn seal(&self) {
        *self.key.write().await = None;
    }

    pub async fn is_unsealed(&self) -> bool {
        self.key.read().await.is_some()
    }

    /// Read and decrypt the value at `path`.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Crypto`] if decryption fails.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, BarrierError> {
        let key = self.barrier_key().await?;
        match self.storage.get(path).await? {
            None => Ok(None),
            Some(entry) => Ok(Some(crypto::decrypt(&key, &entry.value, path.as_bytes())?)),
        }
    }

    /// Encrypt and write `value` at `path`.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Crypto`] if encryption fails.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn put(&self, path: &str, value: &[u8]) -> Result<(), BarrierError> {
        let key = self.barrier_key().await?;
        let ciphertext = crypto::encrypt(&key, value, path.as_bytes())?;
        self.storage.put(&Entry::new(path, ciphertext)).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn delete(&self, path: &str) -> Result<(), BarrierError> {
        self.barrier_key().await?;
        self.storage.delete(path).await?;
        Ok(())
    }

    /// List the children of `prefix`, one level deep.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, BarrierError> {
        self.barrier_key().await?;
        Ok(self.storage.list(prefix).await?)
    }

    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn exists(&self, path: &str) -> Result<bool, BarrierError> {
        self.barrier_key().await?;
        Ok(self.storage.exists(path).await?)
    }

    async fn barrier_key(&self) -> Result<EncryptionKey, BarrierError> {
        self.key.read().await.clone().ok_or(BarrierError::Sealed)
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier").finish_non_exhaustive()
    }
}
