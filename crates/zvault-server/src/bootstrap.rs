//! Startup wiring: storage, seal wrappers, init and unseal.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use zvault_core::access::Access;
use zvault_core::barrier::Barrier;
use zvault_core::crypto::EncryptionKey;
use zvault_core::generation::{SealDescriptor, SealGenerationInfo};
use zvault_core::seal::{InitResult, SealManager};
use zvault_core::seal_wrapper::SealWrapper;
use zvault_core::shamir::ShamirWrapper;
use zvault_core::wrapping::{AEAD_SEAL_TYPE, AeadWrapper, SHAMIR_SEAL_TYPE, Wrapper};
use zvault_storage::{MemoryBackend, StorageBackend};

use crate::config::{ServerConfig, StorageBackendType};
use crate::error::ServerError;

/// Open the configured storage backend.
///
/// # Errors
///
/// - [`ServerError::BackendDisabled`] if the backend is not compiled in.
/// - [`ServerError::Storage`] if it cannot be opened.
pub fn open_storage(backend: &StorageBackendType) -> Result<Arc<dyn StorageBackend>, ServerError> {
    match backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackendType::RocksDb { path } => {
            info!(path = %path, "using RocksDB storage");
            Ok(Arc::new(zvault_storage::RocksDbBackend::open(path)?))
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackendType::RocksDb { .. } => Err(ServerError::BackendDisabled { backend: "rocksdb" }),
    }
}

/// Build the seal access described by `config`.
///
/// # Errors
///
/// - [`ServerError::Seal`] for an unknown seal type or a missing or
///   malformed `aead` key.
/// - [`ServerError::Access`] if the wrapper set is invalid.
pub fn build_access(config: &ServerConfig) -> Result<Access, ServerError> {
    let wrappers = config
        .seals
        .iter()
        .map(|descriptor| {
            let wrapper = build_wrapper(config, descriptor)?;
            Ok(SealWrapper::from_descriptor(descriptor, wrapper))
        })
        .collect::<Result<Vec<_>, ServerError>>()?;

    let info = SealGenerationInfo::new(config.seal_generation, config.seals.clone());
    Ok(Access::new(info, wrappers)?
        .with_call_timeout(Duration::from_secs(config.seal_timeout_secs)))
}

fn build_wrapper(
    config: &ServerConfig,
    descriptor: &SealDescriptor,
) -> Result<Arc<dyn Wrapper>, ServerError> {
    let seal_err = |reason: String| ServerError::Seal {
        name: descriptor.name.clone(),
        reason,
    };
    match descriptor.seal_type.as_str() {
        SHAMIR_SEAL_TYPE => Ok(Arc::new(ShamirWrapper::new())),
        AEAD_SEAL_TYPE => {
            let hex_key = config
                .seal_key(&descriptor.name)
                .ok_or_else(|| seal_err("no key configured".to_owned()))?;
            let bytes = zeroize::Zeroizing::new(
                hex::decode(hex_key).map_err(|e| seal_err(format!("key is not hex: {e}")))?,
            );
            let key = EncryptionKey::from_slice(&bytes).map_err(|e| seal_err(e.to_string()))?;
            Ok(Arc::new(AeadWrapper::new(
                config.seal_key_id(&descriptor.name),
                key,
            )))
        }
        other => Err(seal_err(format!("unsupported seal type '{other}'"))),
    }
}

/// Create the seal manager over `storage` with the configured seals.
///
/// # Errors
///
/// Returns an error if the seals cannot be built or the seal generation is
/// rejected.
pub async fn start_seal(
    config: &ServerConfig,
    storage: Arc<dyn StorageBackend>,
) -> Result<SealManager, ServerError> {
    let access = build_access(config)?;
    let barrier = Arc::new(Barrier::new(Arc::clone(&storage)));
    Ok(SealManager::start(storage, barrier, access).await?)
}

/// Initialize the vault if it is empty and `ZVAULT_INIT_SHARES` is set.
///
/// # Errors
///
/// Returns [`ServerError::SealManager`] if initialization fails.
pub async fn initialize_if_needed(
    manager: &SealManager,
    config: &ServerConfig,
) -> Result<Option<InitResult>, ServerError> {
    let Some(shares) = config.init_shares else {
        return Ok(None);
    };
    if manager.is_initialized().await? {
        return Ok(None);
    }
    let result = manager.init(shares, config.init_threshold).await?;
    Ok(Some(result))
}

/// Unseal at startup: auto seals unseal themselves, Shamir seals use the
/// configured unseal keys. Returns whether the vault is unsealed.
///
/// # Errors
///
/// Returns [`ServerError::SealManager`] if unsealing fails.
pub async fn unseal_at_startup(
    manager: &SealManager,
    config: &ServerConfig,
) -> Result<bool, ServerError> {
    if !manager.is_initialized().await? {
        warn!("vault is not initialized, set ZVAULT_INIT_SHARES to initialize");
        return Ok(false);
    }

    if !manager.access().await.is_shamir() {
        manager.unseal_with_stored_keys().await?;
        return Ok(true);
    }

    for share in &config.unseal_keys {
        if manager.submit_unseal_share(share).await?.is_none() {
            return Ok(true);
        }
    }
    warn!(
        submitted = config.unseal_keys.len(),
        "vault remains sealed, not enough unseal keys configured"
    );
    Ok(false)
}
