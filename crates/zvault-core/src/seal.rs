//! Seal/unseal lifecycle for `ZVault`.
//!
//! The [`SealManager`] drives the barrier through its lifecycle using the
//! configured seal [`Access`]:
//!
//! 1. **Init**: generate the barrier key and seal-wrap it as the stored
//!    barrier keys. With a Shamir seal, a fresh unseal key is split into N
//!    shares (threshold T) and installed on the Shamir wrapper. With an auto
//!    seal, a recovery key is split instead and stored seal-wrapped.
//!
//! 2. **Unseal**: Shamir seals collect T shares, combine them, and use the
//!    result to unwrap the stored barrier keys. Auto seals unwrap the stored
//!    barrier keys directly. Either way the first barrier key unseals the
//!    barrier, and stored values found out of date are rewrapped.
//!
//! 3. **Seal**: drop the barrier key and any pending shares.
//!
//! Seal reconfiguration replaces the whole [`Access`]; the new generation is
//! validated against the stored one and persisted at
//! [`SEAL_GEN_INFO_PATH`](crate::generation::SEAL_GEN_INFO_PATH) before it
//! takes effect.
//!
//! # Security model
//!
//! - The unseal key is never stored. It exists only as Shamir shares held by
//!   operators, and recovery shares are likewise never stored.
//! - The barrier key is only ever stored seal-wrapped.
//! - Shares are returned once at init time and never persisted by the server.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zeroize::Zeroizing;
use zvault_storage::StorageBackend;

use crate::access::{Access, UnhealthyStreak};
use crate::barrier::Barrier;
use crate::crypto::EncryptionKey;
use crate::error::{BarrierError, SealError, StoredKeysError};
use crate::generation;
use crate::shamir::{combine_shares, split_key, validate_share_config};
use crate::stored_keys::{
    RECOVERY_KEY_PATH, STORED_BARRIER_KEYS_PATH, UnwrappedKeys, seal_wrap_recovery_key,
    seal_wrap_stored_barrier_keys, unseal_wrap_recovery_key, unseal_wrap_stored_barrier_keys,
};
use crate::wrapping::SHAMIR_SEAL_TYPE;

/// Storage key for the seal configuration.
pub const SEAL_CONFIG_PATH: &str = "core/seal-config";

/// Storage key for the recovery configuration (auto seals only).
pub const RECOVERY_CONFIG_PATH: &str = "core/recovery-config";

/// Persisted share configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealConfig {
    /// Seal type at init time.
    #[serde(rename = "type")]
    pub seal_type: String,
    /// Total number of shares.
    pub shares: u8,
    /// Minimum shares required to reconstruct the key.
    pub threshold: u8,
}

/// Result of a successful vault initialization.
#[derive(Debug)]
pub struct InitResult {
    /// Base64-encoded unseal key shares (Shamir seals). Shown once, never stored.
    pub unseal_shares: Vec<String>,
    /// Base64-encoded recovery key shares (auto seals). Shown once, never stored.
    pub recovery_shares: Vec<String>,
}

/// Progress of an ongoing unseal operation.
#[derive(Debug, Clone)]
pub struct UnsealProgress {
    /// Total threshold required.
    pub threshold: u8,
    /// Number of shares submitted so far.
    pub submitted: u8,
}

/// Outcome of a rewrap pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewrapReport {
    /// Stored entries examined.
    pub checked: usize,
    /// Entries rewritten with the current seal.
    pub rewrapped: usize,
}

/// Current seal status of the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealStatus {
    pub initialized: bool,
    pub sealed: bool,
    /// `"shamir"`, a wrapper type, or `"multiseal"`.
    pub seal_type: String,
    /// Threshold of shares required to unseal.
    pub threshold: u8,
    /// Total number of shares.
    pub shares: u8,
    /// Number of shares submitted so far in the current unseal attempt.
    pub progress: u8,
    /// Current seal generation.
    pub generation: u64,
    /// Whether stored values have been migrated to the current generation.
    pub rewrapped: bool,
    /// Whether every enabled seal wrapper is healthy.
    pub healthy: bool,
}

/// Manages the seal/unseal lifecycle.
///
/// Holds the barrier, the current seal access, and the accumulated unseal
/// shares.
pub struct SealManager {
    storage: Arc<dyn StorageBackend>,
    barrier: Arc<Barrier>,
    access: RwLock<Arc<Access>>,
    /// Raw share bytes collected during unseal. Cleared after success or seal.
    pending_shares: Mutex<Vec<Vec<u8>>>,
}

impl SealManager {
    /// Initialize `access` and adopt its seal generation.
    ///
    /// The generation is validated against the stored one and persisted.
    /// Values wrapped under an older generation are rewrapped after the next
    /// unseal.
    ///
    /// # Errors
    ///
    /// - [`SealError::Generation`] if the seal set is not an allowed change
    ///   from the stored generation.
    /// - [`SealError::MigrationRequiresUnseal`] if an initialized Shamir
    ///   vault is moved to another seal type; use
    ///   [`reconfigure`](Self::reconfigure) after unsealing instead.
    /// - [`SealError::Access`] if a wrapper fails to initialize.
    pub async fn start(
        storage: Arc<dyn StorageBackend>,
        barrier: Arc<Barrier>,
        access: Access,
    ) -> Result<Self, SealError> {
        let access = Arc::new(access);
        let unsealed = barrier.is_unsealed().await;
        adopt_generation(storage.as_ref(), &access, unsealed).await?;
        Ok(Self {
            storage,
            barrier,
            access: RwLock::new(access),
            pending_shares: Mutex::new(Vec::new()),
        })
    }

    /// The seal access currently in effect.
    pub async fn access(&self) -> Arc<Access> {
        Arc::clone(&*self.access.read().await)
    }

    #[must_use]
    pub fn barrier(&self) -> &Arc<Barrier> {
        &self.barrier
    }

    /// Initialize a new vault.
    ///
    /// The vault is left **sealed**. Shamir vaults return unseal shares;
    /// auto-sealed vaults return recovery shares.
    ///
    /// # Errors
    ///
    /// - [`SealError::AlreadyInitialized`] if the vault has already been initialized.
    /// - [`SealError::InvalidConfig`] if share count or threshold are out of bounds.
    /// - [`SealError::StoredKeys`] if the barrier key cannot be seal-wrapped.
    /// - [`SealError::Storage`] if writing to the backend fails.
    pub async fn init(&self, shares: u8, threshold: u8) -> Result<InitResult, SealError> {
        validate_share_config(shares, threshold)?;
        if self.is_initialized().await? {
            return Err(SealError::AlreadyInitialized);
        }

        let access = self.access().await;
        let barrier_key = EncryptionKey::generate();
        let mut result = InitResult {
            unseal_shares: Vec::new(),
            recovery_shares: Vec::new(),
        };

        let seal_config = if access.is_shamir() {
            let unseal_key = EncryptionKey::generate();
            result.unseal_shares = encode_shares(split_key(unseal_key.as_bytes(), shares, threshold)?);
            access.set_shamir_seal_key(unseal_key.as_bytes())?;
            SealConfig {
                seal_type: access.seal_type().to_owned(),
                shares,
                threshold,
            }
        } else {
            let recovery_key = EncryptionKey::generate();
            result.recovery_shares =
                encode_shares(split_key(recovery_key.as_bytes(), shares, threshold)?);
            let entry = seal_wrap_recovery_key(&access, recovery_key.as_bytes()).await?;
            self.storage.put(&entry).await?;
            self.put_config(
                RECOVERY_CONFIG_PATH,
                &SealConfig {
                    seal_type: "recovery".to_owned(),
                    shares,
                    threshold,
                },
            )
            .await?;
            SealConfig {
                seal_type: access.seal_type().to_owned(),
                shares: 1,
                threshold: 1,
            }
        };

        let keys = [Zeroizing::new(barrier_key.as_bytes().to_vec())];
        let entry = seal_wrap_stored_barrier_keys(&access, &keys).await?;
        self.storage.put(&entry).await?;

        let info = access.generation_info();
        info.set_rewrapped(true);
        generation::store(self.storage.as_ref(), info).await?;

        self.put_config(SEAL_CONFIG_PATH, &seal_config).await?;

        info!(
            shares,
            threshold,
            seal_type = access.seal_type(),
            generation = access.generation(),
            "vault initialized"
        );
        Ok(result)
    }

    /// Submit an unseal share (Shamir seals only).
    ///
    /// Returns `Ok(Some(progress))` if more shares are needed, or `Ok(None)`
    /// once the threshold is reached and the vault is unsealed.
    ///
    /// # Errors
    ///
    /// - [`SealError::NotInitialized`] if the vault hasn't been initialized.
    /// - [`SealError::AlreadyUnsealed`] if the vault is already unsealed.
    /// - [`SealError::WrongSealType`] if the seal is not Shamir.
    /// - [`SealError::InvalidShare`] if the share is malformed.
    /// - [`SealError::RecoveryFailed`] if share reconstruction fails.
    /// - [`SealError::InvalidKey`] if the combined key is wrong.
    pub async fn submit_unseal_share(
        &self,
        share_b64: &str,
    ) -> Result<Option<UnsealProgress>, SealError> {
        let config = self.load_config(SEAL_CONFIG_PATH).await?;
        if self.barrier.is_unsealed().await {
            return Err(SealError::AlreadyUnsealed);
        }
        let access = self.access().await;
        if !access.is_shamir() {
            return Err(SealError::WrongSealType {
                seal_type: access.seal_type().to_owned(),
            });
        }

        let share = BASE64
            .decode(share_b64.trim())
            .map_err(|e| SealError::InvalidShare {
                reason: format!("base64 decode failed: {e}"),
            })?;

        let mut pending = self.pending_shares.lock().await;
        if pending.contains(&share) {
            return Err(SealError::InvalidShare {
                reason: "share already submitted".to_owned(),
            });
        }
        pending.push(share);

        let submitted = u8::try_from(pending.len()).unwrap_or(u8::MAX);
        if submitted < config.threshold {
            return Ok(Some(UnsealProgress {
                threshold: config.threshold,
                submitted,
            }));
        }

        let shares = std::mem::take(&mut *pending);
        drop(pending);

        let unseal_key = combine_shares(&shares, config.threshold)?;
        access.set_shamir_seal_key(&unseal_key)?;
        self.unseal_from_stored_keys(&access).await?;
        Ok(None)
    }

    /// Unseal with the stored barrier keys (auto seals only).
    ///
    /// # Errors
    ///
    /// - [`SealError::NotInitialized`] if the vault hasn't been initialized.
    /// - [`SealError::AlreadyUnsealed`] if the vault is already unsealed.
    /// - [`SealError::WrongSealType`] if the seal is Shamir.
    /// - [`SealError::InvalidKey`] or [`SealError::StoredKeys`] if the stored
    ///   keys cannot be unwrapped.
    pub async fn unseal_with_stored_keys(&self) -> Result<(), SealError> {
        if !self.is_initialized().await? {
            return Err(SealError::NotInitialized);
        }
        if self.barrier.is_unsealed().await {
            return Err(SealError::AlreadyUnsealed);
        }
        let access = self.access().await;
        if access.is_shamir() {
            return Err(SealError::WrongSealType {
                seal_type: access.seal_type().to_owned(),
            });
        }
        self.unseal_from_stored_keys(&access).await
    }

    async fn unseal_from_stored_keys(&self, access: &Access) -> Result<(), SealError> {
        let entry = self
            .storage
            .get(STORED_BARRIER_KEYS_PATH)
            .await?
            .ok_or(SealError::NotInitialized)?;

        let UnwrappedKeys {
            keys,
            is_up_to_date,
        } = unseal_wrap_stored_barrier_keys(access, &entry.value)
            .await
            .map_err(map_invalid_key)?;

        let barrier_key = keys.first().ok_or_else(|| SealError::InvalidKey {
            reason: "no barrier keys stored".to_owned(),
        })?;
        self.barrier
            .unseal(EncryptionKey::from_slice(barrier_key)?)
            .await;
        info!(seal_type = access.seal_type(), "vault unsealed");

        if !is_up_to_date || !access.generation_info().is_rewrapped() {
            match self.rewrap().await {
                Ok(report) => info!(
                    checked = report.checked,
                    rewrapped = report.rewrapped,
                    "stored keys rewrapped after unseal"
                ),
                Err(err) => warn!(error = %err, "failed to rewrap stored keys after unseal"),
            }
        }
        Ok(())
    }

    /// Seal the vault, dropping the barrier key.
    ///
    /// # Errors
    ///
    /// - [`SealError::AlreadySealed`] if the vault is already sealed.
    pub async fn seal(&self) -> Result<(), SealError> {
        if !self.barrier.is_unsealed().await {
            return Err(SealError::AlreadySealed);
        }
        // Waits for an in-flight reconfiguration.
        let _access = self.access.read().await;
        self.pending_shares.lock().await.clear();
        self.barrier.seal().await;
        info!("vault sealed");
        Ok(())
    }

    /// Replace the Shamir unseal key with a fresh one split into `shares`
    /// shares (threshold `threshold`), and rewrap the stored barrier keys
    /// under it.
    ///
    /// The replaced key stays installed as the previous key, so the stored
    /// keys decrypt as out of date and are rewritten. On a rewrap failure the
    /// previous key is reinstalled and the old shares remain valid.
    ///
    /// # Errors
    ///
    /// - [`SealError::InvalidConfig`] if share count or threshold are out of bounds.
    /// - [`SealError::NotInitialized`] if the vault hasn't been initialized.
    /// - [`SealError::Barrier`] with [`BarrierError::Sealed`] if the vault is
    ///   sealed.
    /// - [`SealError::WrongSealType`] if the seal is not Shamir.
    /// - Any rewrap or storage error.
    pub async fn rekey(&self, shares: u8, threshold: u8) -> Result<Vec<String>, SealError> {
        validate_share_config(shares, threshold)?;
        let mut config = self.load_config(SEAL_CONFIG_PATH).await?;
        // Held so the vault cannot be sealed or reconfigured mid-rekey.
        let access = self.access.write().await;
        if !self.barrier.is_unsealed().await {
            return Err(BarrierError::Sealed.into());
        }
        if !access.is_shamir() {
            return Err(SealError::WrongSealType {
                seal_type: access.seal_type().to_owned(),
            });
        }

        let previous_key = access.shamir_key_bytes()?;
        let unseal_key = EncryptionKey::generate();
        let unseal_shares = encode_shares(split_key(unseal_key.as_bytes(), shares, threshold)?);
        access.rotate_shamir_seal_key(unseal_key.as_bytes())?;

        if let Err(err) = self.rewrap_with(&access, None).await {
            access.set_shamir_seal_key(&previous_key)?;
            return Err(err);
        }

        config.shares = shares;
        config.threshold = threshold;
        self.put_config(SEAL_CONFIG_PATH, &config).await?;
        drop(access);

        info!(shares, threshold, "unseal key rotated");
        Ok(unseal_shares)
    }

    /// Check whether the vault has been initialized.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Storage`] if the storage backend fails.
    pub async fn is_initialized(&self) -> Result<bool, SealError> {
        Ok(self.storage.exists(SEAL_CONFIG_PATH).await?)
    }

    /// Get the current seal status.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Storage`] if the storage backend fails.
    pub async fn status(&self) -> Result<SealStatus, SealError> {
        let initialized = self.is_initialized().await?;
        let sealed = !self.barrier.is_unsealed().await;
        let access = self.access().await;

        let (threshold, shares, progress) = if initialized {
            let config = self.load_config(SEAL_CONFIG_PATH).await?;
            let submitted = u8::try_from(self.pending_shares.lock().await.len()).unwrap_or(u8::MAX);
            (config.threshold, config.shares, submitted)
        } else {
            (0, 0, 0)
        };

        Ok(SealStatus {
            initialized,
            sealed,
            seal_type: access.seal_type().to_owned(),
            threshold,
            shares,
            progress,
            generation: access.generation(),
            rewrapped: access.generation_info().is_rewrapped(),
            healthy: access.all_seals_healthy(),
        })
    }

    /// Replace the seal access with `access`.
    ///
    /// The new generation is validated and persisted first. When it differs
    /// from the stored one and the vault is unsealed, stored keys are
    /// rewrapped immediately, falling back to the previous access for values
    /// the new one cannot decrypt. The previous access is finalized.
    ///
    /// # Errors
    ///
    /// - [`SealError::Generation`] if the change is not allowed; nothing is
    ///   modified in that case.
    /// - [`SealError::MigrationRequiresUnseal`] when leaving a Shamir seal
    ///   while sealed; nothing is modified in that case either.
    /// - [`SealError::Access`] if a new wrapper fails to initialize.
    /// - Any rewrap error.
    pub async fn reconfigure(&self, access: Access) -> Result<(), SealError> {
        let access = Arc::new(access);
        // Held until the rewrap finishes so the vault cannot be sealed
        // between the generation change and the rewrap.
        let mut current = self.access.write().await;
        let unsealed = self.barrier.is_unsealed().await;
        let changed = adopt_generation(self.storage.as_ref(), &access, unsealed).await?;

        let previous = std::mem::replace(&mut *current, Arc::clone(&access));
        if previous.is_shamir() && access.is_shamir() {
            if let Ok(key) = previous.shamir_key_bytes() {
                access.set_shamir_seal_key(&key)?;
            }
        }

        info!(
            generation = access.generation(),
            changed,
            seal_type = access.seal_type(),
            "seal reconfigured"
        );

        let rewrap = if changed && unsealed {
            self.rewrap_with(&access, Some(&previous)).await.map(|_| ())
        } else {
            Ok(())
        };
        drop(current);

        if let Err(err) = previous.finalize().await {
            warn!(error = %err, "failed to finalize previous seal wrappers");
        }
        rewrap
    }

    /// Check the seal wrappers every `interval` until `shutdown` changes.
    ///
    /// Each tick checks whichever access is current at that moment, so the
    /// loop follows [`reconfigure`](Self::reconfigure).
    pub fn spawn_health_checks(
        self: Arc<Self>,
        interval: Duration,
        timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut streak = UnhealthyStreak::default();
            info!(interval_secs = interval.as_secs(), "seal health checks started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let access = self.access().await;
                        streak.record(access.check_health(timeout).await);
                    }
                    _ = shutdown.changed() => {
                        info!("seal health checks shutting down");
                        return;
                    }
                }
            }
        })
    }

    /// Rewrite stored keys that are not up to date with the current seal,
    /// then mark the generation as rewrapped.
    ///
    /// # Errors
    ///
    /// - [`SealError::Barrier`] with [`BarrierError::Sealed`] if the vault is
    ///   sealed.
    /// - [`SealError::StoredKeys`] if an entry cannot be unwrapped or
    ///   rewrapped.
    pub async fn rewrap(&self) -> Result<RewrapReport, SealError> {
        let access = self.access().await;
        self.rewrap_with(&access, None).await
    }

    async fn rewrap_with(
        &self,
        access: &Access,
        fallback: Option<&Access>,
    ) -> Result<RewrapReport, SealError> {
        if !self.barrier.is_unsealed().await {
            return Err(BarrierError::Sealed.into());
        }
        let mut report = RewrapReport::default();

        if let Some(entry) = self.storage.get(STORED_BARRIER_KEYS_PATH).await? {
            report.checked += 1;
            let unwrapped = match unseal_wrap_stored_barrier_keys(access, &entry.value).await {
                Ok(unwrapped) => unwrapped,
                Err(err) => match fallback {
                    Some(previous) => UnwrappedKeys {
                        is_up_to_date: false,
                        ..unseal_wrap_stored_barrier_keys(previous, &entry.value)
                            .await
                            .map_err(|_| err)?
                    },
                    None => return Err(err.into()),
                },
            };
            if !unwrapped.is_up_to_date {
                let entry = seal_wrap_stored_barrier_keys(access, &unwrapped.keys).await?;
                self.storage.put(&entry).await?;
                report.rewrapped += 1;
            }
        }

        if let Some(entry) = self.storage.get(RECOVERY_KEY_PATH).await? {
            report.checked += 1;
            let (key, is_up_to_date) = match unseal_wrap_recovery_key(access, &entry.value).await {
                Ok(unwrapped) => unwrapped,
                Err(err) => match fallback {
                    Some(previous) => {
                        let (key, _) = unseal_wrap_recovery_key(previous, &entry.value)
                            .await
                            .map_err(|_| err)?;
                        (key, false)
                    }
                    None => return Err(err.into()),
                },
            };
            if !is_up_to_date {
                let entry = seal_wrap_recovery_key(access, &key).await?;
                self.storage.put(&entry).await?;
                report.rewrapped += 1;
            }
        }

        let info = access.generation_info();
        info.set_rewrapped(true);
        generation::store(self.storage.as_ref(), info).await?;

        info!(
            generation = access.generation(),
            checked = report.checked,
            rewrapped = report.rewrapped,
            "seal rewrap complete"
        );
        Ok(report)
    }

    async fn put_config(&self, path: &str, config: &SealConfig) -> Result<(), SealError> {
        let bytes = serde_json::to_vec(config).map_err(|e| SealError::InvalidConfig {
            reason: format!("failed to serialize seal config: {e}"),
        })?;
        self.storage
            .put(&zvault_storage::Entry::new(path, bytes))
            .await?;
        Ok(())
    }

    async fn load_config(&self, path: &str) -> Result<SealConfig, SealError> {
        let entry = self
            .storage
            .get(path)
            .await?
            .ok_or(SealError::NotInitialized)?;
        serde_json::from_slice(&entry.value).map_err(|e| SealError::InvalidConfig {
            reason: format!("failed to deserialize seal config: {e}"),
        })
    }
}

impl std::fmt::Debug for SealManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealManager")
            .field("barrier", &self.barrier)
            .finish_non_exhaustive()
    }
}

/// Validate `access` against the stored generation, initialize it, and
/// persist its generation info. Returns whether the generation changed.
///
/// Nothing is written when validation fails. Leaving a Shamir seal is
/// refused while sealed once barrier keys exist: the new seal could not
/// unwrap them and the stored generation could never be reverted.
async fn adopt_generation(
    storage: &dyn StorageBackend,
    access: &Access,
    unsealed: bool,
) -> Result<bool, SealError> {
    let existing = generation::load(storage).await?;
    let info = access.generation_info();
    info.validate(existing.as_ref())?;

    if let Some(existing) = &existing {
        let leaving_shamir = existing.generation != info.generation
            && existing.is_shamir()
            && !info.is_shamir();
        if leaving_shamir && !unsealed && storage.exists(STORED_BARRIER_KEYS_PATH).await? {
            return Err(SealError::MigrationRequiresUnseal {
                from: SHAMIR_SEAL_TYPE.to_owned(),
                to: access.seal_type().to_owned(),
            });
        }
    }
    access.init().await?;

    let changed = match &existing {
        Some(existing) if existing.generation == info.generation => {
            info.set_rewrapped(existing.is_rewrapped());
            false
        }
        Some(existing) => {
            info!(
                from = existing.generation,
                to = info.generation,
                "seal generation changed"
            );
            info.set_rewrapped(false);
            true
        }
        // Keys stored before generations were tracked still need a rewrap.
        None => {
            info.set_rewrapped(!storage.exists(STORED_BARRIER_KEYS_PATH).await?);
            false
        }
    };
    generation::store(storage, info).await?;
    Ok(changed)
}

fn encode_shares(shares: Vec<Vec<u8>>) -> Vec<String> {
    shares.into_iter().map(|s| BASE64.encode(s)).collect()
}

fn map_invalid_key(err: StoredKeysError) -> SealError {
    match err {
        StoredKeysError::InvalidKey { reason } => SealError::InvalidKey { reason },
        other => SealError::StoredKeys(other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use zvault_storage::MemoryBackend;

    use super::*;
    use crate::error::GenerationError;
    use crate::generation::{SealDescriptor, SealGenerationInfo};
    use crate::seal_wrapper::SealWrapper;
    use crate::shamir::ShamirWrapper;
    use crate::testing::{TestWrapper, seal_wrapper};
    use crate::wrapped_value::unmarshal_seal_wrapped_value;
    use crate::wrapping::{AeadWrapper, Wrapper};

    fn shamir_access(generation: u64) -> Access {
        Access::from_wrapper(generation, "shamir", Arc::new(ShamirWrapper::new())).unwrap()
    }

    fn aead_access(generation: u64, seals: &[(&str, &Arc<AeadWrapper>)]) -> Access {
        let descriptors: Vec<_> = seals
            .iter()
            .zip(1..)
            .map(|((name, _), priority)| SealDescriptor::new("aead", *name, priority))
            .collect();
        let wrappers = descriptors
            .iter()
            .zip(seals)
            .map(|(d, (_, w))| SealWrapper::from_descriptor(d, Arc::clone(w) as Arc<dyn Wrapper>))
            .collect();
        Access::new(SealGenerationInfo::new(generation, descriptors), wrappers).unwrap()
    }

    async fn manager(storage: &Arc<MemoryBackend>, access: Access) -> SealManager {
        let storage = Arc::clone(storage) as Arc<dyn StorageBackend>;
        let barrier = Arc::new(Barrier::new(Arc::clone(&storage)));
        SealManager::start(storage, barrier, access).await.unwrap()
    }

    async fn shamir_manager() -> SealManager {
        manager(&Arc::new(MemoryBackend::new()), shamir_access(1)).await
    }

    async fn stored_generation(storage: &Arc<MemoryBackend>, path: &str) -> u64 {
        let entry = storage.get(path).await.unwrap().unwrap();
        unmarshal_seal_wrapped_value(&entry.value).unwrap().generation()
    }

    async fn unseal_with(mgr: &SealManager, shares: &[String]) {
        for share in shares {
            mgr.submit_unseal_share(share).await.unwrap();
        }
    }

    // ── init ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn init_returns_correct_share_count_and_stays_sealed() {
        let mgr = shamir_manager().await;
        assert!(!mgr.is_initialized().await.unwrap());

        let result = mgr.init(5, 3).await.unwrap();
        assert_eq!(result.unseal_shares.len(), 5);
        assert!(result.recovery_shares.is_empty());
        assert!(mgr.is_initialized().await.unwrap());
        assert!(!mgr.barrier().is_unsealed().await);
    }

    #[tokio::test]
    async fn init_twice_returns_already_initialized() {
        let mgr = shamir_manager().await;
        mgr.init(3, 2).await.unwrap();
        assert!(matches!(
            mgr.init(3, 2).await,
            Err(SealError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn init_invalid_config_rejected() {
        let mgr = shamir_manager().await;
        assert!(matches!(mgr.init(0, 2).await, Err(SealError::InvalidConfig { .. })));
        assert!(matches!(mgr.init(3, 4).await, Err(SealError::InvalidConfig { .. })));
        assert!(!mgr.is_initialized().await.unwrap());
    }

    #[tokio::test]
    async fn init_marks_generation_rewrapped() {
        let storage = Arc::new(MemoryBackend::new());
        let mgr = manager(&storage, shamir_access(1)).await;
        mgr.init(3, 2).await.unwrap();

        let stored = generation::load(storage.as_ref()).await.unwrap().unwrap();
        assert_eq!(stored.generation, 1);
        assert!(stored.is_rewrapped());
    }

    // ── Shamir unseal ────────────────────────────────────────────────

    #[tokio::test]
    async fn unseal_full_flow_with_threshold() {
        let mgr = shamir_manager().await;
        let result = mgr.init(5, 3).await.unwrap();

        let p = mgr
            .submit_unseal_share(&result.unseal_shares[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!((p.threshold, p.submitted), (3, 1));

        let p = mgr
            .submit_unseal_share(&result.unseal_shares[1])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(p.submitted, 2);

        let done = mgr
            .submit_unseal_share(&result.unseal_shares[2])
            .await
            .unwrap();
        assert!(done.is_none());
        assert!(mgr.barrier().is_unsealed().await);

        mgr.barrier().put("test/key", b"hello").await.unwrap();
        assert_eq!(
            mgr.barrier().get("test/key").await.unwrap(),
            Some(b"hello".to_vec())
        );
    }

    #[tokio::test]
    async fn single_share_unseals() {
        let mgr = shamir_manager().await;
        let result = mgr.init(1, 1).await.unwrap();
        let done = mgr
            .submit_unseal_share(&result.unseal_shares[0])
            .await
            .unwrap();
        assert!(done.is_none());
        assert!(mgr.barrier().is_unsealed().await);
    }

    #[tokio::test]
    async fn unseal_not_initialized_returns_error() {
        let mgr = shamir_manager().await;
        let err = mgr.submit_unseal_share("dGVzdA==").await.unwrap_err();
        assert!(matches!(err, SealError::NotInitialized));
    }

    #[tokio::test]
    async fn unseal_already_unsealed_returns_error() {
        let mgr = shamir_manager().await;
        let result = mgr.init(2, 2).await.unwrap();
        unseal_with(&mgr, &result.unseal_shares).await;

        let err = mgr
            .submit_unseal_share(&result.unseal_shares[0])
            .await
            .unwrap_err();
        assert!(matches!(err, SealError::AlreadyUnsealed));
    }

    #[tokio::test]
    async fn unseal_rejects_bad_and_duplicate_shares() {
        let mgr = shamir_manager().await;
        let result = mgr.init(3, 2).await.unwrap();

        assert!(matches!(
            mgr.submit_unseal_share("not-valid-base64!!!").await,
            Err(SealError::InvalidShare { .. })
        ));

        mgr.submit_unseal_share(&result.unseal_shares[0])
            .await
            .unwrap();
        assert!(matches!(
            mgr.submit_unseal_share(&result.unseal_shares[0]).await,
            Err(SealError::InvalidShare { .. })
        ));
        assert_eq!(mgr.status().await.unwrap().progress, 1);
    }

    #[tokio::test]
    async fn shares_from_another_vault_are_an_invalid_key() {
        let mgr = shamir_manager().await;
        mgr.init(2, 2).await.unwrap();
        let other = shamir_manager().await;
        let foreign = other.init(2, 2).await.unwrap();

        mgr.submit_unseal_share(&foreign.unseal_shares[0])
            .await
            .unwrap();
        let err = mgr
            .submit_unseal_share(&foreign.unseal_shares[1])
            .await
            .unwrap_err();
        assert!(matches!(err, SealError::InvalidKey { .. }), "{err}");
        assert!(!mgr.barrier().is_unsealed().await);
        assert_eq!(mgr.status().await.unwrap().progress, 0);
    }

    #[tokio::test]
    async fn shamir_seal_cannot_auto_unseal() {
        let mgr = shamir_manager().await;
        mgr.init(2, 2).await.unwrap();
        assert!(matches!(
            mgr.unseal_with_stored_keys().await,
            Err(SealError::WrongSealType { .. })
        ));
    }

    // ── seal ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn reseal_and_reunseal_with_other_shares() {
        let mgr = shamir_manager().await;
        let result = mgr.init(3, 2).await.unwrap();

        unseal_with(&mgr, &result.unseal_shares[..2]).await;
        mgr.barrier().put("k", b"persistent").await.unwrap();

        mgr.seal().await.unwrap();
        assert!(!mgr.barrier().is_unsealed().await);
        assert!(matches!(mgr.seal().await, Err(SealError::AlreadySealed)));

        unseal_with(&mgr, &result.unseal_shares[1..]).await;
        assert_eq!(
            mgr.barrier().get("k").await.unwrap(),
            Some(b"persistent".to_vec())
        );
    }

    // ── rekey ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn rekey_replaces_shares_and_rewraps_stored_keys() {
        let storage = Arc::new(MemoryBackend::new());
        let mgr = manager(&storage, shamir_access(1)).await;
        let old = mgr.init(3, 2).await.unwrap();
        unseal_with(&mgr, &old.unseal_shares[..2]).await;
        mgr.barrier().put("k", b"kept").await.unwrap();
        let before = storage.get(STORED_BARRIER_KEYS_PATH).await.unwrap().unwrap();

        let shares = mgr.rekey(5, 3).await.unwrap();
        assert_eq!(shares.len(), 5);
        let after = storage.get(STORED_BARRIER_KEYS_PATH).await.unwrap().unwrap();
        assert_ne!(before.value, after.value);
        let status = mgr.status().await.unwrap();
        assert_eq!((status.threshold, status.shares), (3, 5));

        mgr.seal().await.unwrap();
        for share in &old.unseal_shares[..2] {
            mgr.submit_unseal_share(share).await.unwrap();
        }
        let err = mgr.submit_unseal_share(&old.unseal_shares[2]).await.unwrap_err();
        assert!(matches!(err, SealError::InvalidKey { .. }), "{err}");

        // A fresh wrapper has no previous key, so the stored keys must
        // already be under the new one.
        let restarted = manager(&storage, shamir_access(1)).await;
        unseal_with(&restarted, &shares[2..]).await;
        assert_eq!(restarted.barrier().get("k").await.unwrap(), Some(b"kept".to_vec()));
    }

    #[tokio::test]
    async fn rekey_needs_an_unsealed_shamir_vault() {
        let mgr = shamir_manager().await;
        assert!(matches!(mgr.rekey(3, 2).await, Err(SealError::NotInitialized)));
        mgr.init(3, 2).await.unwrap();
        assert!(matches!(
            mgr.rekey(3, 2).await,
            Err(SealError::Barrier(BarrierError::Sealed))
        ));
        assert!(matches!(mgr.rekey(3, 5).await, Err(SealError::InvalidConfig { .. })));

        let a = Arc::new(AeadWrapper::generate("key-a"));
        let auto = manager(&Arc::new(MemoryBackend::new()), aead_access(1, &[("a", &a)])).await;
        auto.init(1, 1).await.unwrap();
        auto.unseal_with_stored_keys().await.unwrap();
        assert!(matches!(
            auto.rekey(3, 2).await,
            Err(SealError::WrongSealType { .. })
        ));
    }

    #[tokio::test]
    async fn seal_clears_pending_shares() {
        let mgr = shamir_manager().await;
        let result = mgr.init(3, 2).await.unwrap();
        unseal_with(&mgr, &result.unseal_shares[..2]).await;

        mgr.seal().await.unwrap();
        mgr.submit_unseal_share(&result.unseal_shares[0])
            .await
            .unwrap();
        mgr.barrier().unseal(EncryptionKey::generate()).await;
        mgr.seal().await.unwrap();

        assert_eq!(mgr.status().await.unwrap().progress, 0);
    }

    // ── status ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn status_tracks_lifecycle() {
        let mgr = shamir_manager().await;
        let status = mgr.status().await.unwrap();
        assert!(!status.initialized);
        assert!(status.sealed);
        assert_eq!((status.threshold, status.shares, status.progress), (0, 0, 0));
        assert_eq!(status.seal_type, "shamir");
        assert_eq!(status.generation, 1);

        let result = mgr.init(5, 3).await.unwrap();
        mgr.submit_unseal_share(&result.unseal_shares[0])
            .await
            .unwrap();
        let status = mgr.status().await.unwrap();
        assert!(status.initialized);
        assert!(status.sealed);
        assert_eq!((status.threshold, status.shares, status.progress), (3, 5, 1));

        unseal_with(&mgr, &result.unseal_shares[1..3]).await;
        let status = mgr.status().await.unwrap();
        assert!(!status.sealed);
        assert_eq!(status.progress, 0);
        assert!(status.rewrapped);
        assert!(status.healthy);
    }

    // ── auto seal ────────────────────────────────────────────────────

    #[tokio::test]
    async fn auto_seal_init_and_unseal() {
        let storage = Arc::new(MemoryBackend::new());
        let a = Arc::new(AeadWrapper::generate("key-a"));
        let mgr = manager(&storage, aead_access(1, &[("a", &a)])).await;

        let result = mgr.init(3, 2).await.unwrap();
        assert!(result.unseal_shares.is_empty());
        assert_eq!(result.recovery_shares.len(), 3);
        assert!(storage.get(RECOVERY_KEY_PATH).await.unwrap().is_some());

        assert!(matches!(
            mgr.submit_unseal_share(&result.recovery_shares[0]).await,
            Err(SealError::WrongSealType { .. })
        ));

        mgr.unseal_with_stored_keys().await.unwrap();
        assert!(mgr.barrier().is_unsealed().await);
        assert!(matches!(
            mgr.unseal_with_stored_keys().await,
            Err(SealError::AlreadyUnsealed)
        ));

        let status = mgr.status().await.unwrap();
        assert_eq!(status.seal_type, "aead");
        assert_eq!((status.threshold, status.shares), (1, 1));
    }

    #[tokio::test]
    async fn recovery_shares_recombine_to_stored_recovery_key() {
        let storage = Arc::new(MemoryBackend::new());
        let a = Arc::new(AeadWrapper::generate("key-a"));
        let access = aead_access(1, &[("a", &a)]);
        let mgr = manager(&storage, access).await;
        let result = mgr.init(3, 2).await.unwrap();

        let shares: Vec<Vec<u8>> = result.recovery_shares[..2]
            .iter()
            .map(|s| BASE64.decode(s).unwrap())
            .collect();
        let combined = combine_shares(&shares, 2).unwrap();

        let entry = storage.get(RECOVERY_KEY_PATH).await.unwrap().unwrap();
        let access = mgr.access().await;
        let (stored, _) = unseal_wrap_recovery_key(&*access, &entry.value)
            .await
            .unwrap();
        assert_eq!(stored, combined);
    }

    #[tokio::test]
    async fn auto_unseal_survives_one_failed_wrapper() {
        let storage = Arc::new(MemoryBackend::new());
        let a = Arc::new(AeadWrapper::generate("key-a"));
        let b = Arc::new(AeadWrapper::generate("key-b"));
        let mgr = manager(&storage, aead_access(1, &[("a", &a), ("b", &b)])).await;
        mgr.init(1, 1).await.unwrap();

        a.set_key(EncryptionKey::generate());
        mgr.unseal_with_stored_keys().await.unwrap();
        assert!(mgr.barrier().is_unsealed().await);
    }

    #[tokio::test]
    async fn auto_unseal_with_no_working_wrapper_fails() {
        let storage = Arc::new(MemoryBackend::new());
        let a = Arc::new(AeadWrapper::generate("key-a"));
        let mgr = manager(&storage, aead_access(1, &[("a", &a)])).await;
        mgr.init(1, 1).await.unwrap();

        a.set_key(EncryptionKey::generate());
        let err = mgr.unseal_with_stored_keys().await.unwrap_err();
        assert!(matches!(err, SealError::InvalidKey { .. }), "{err}");
        assert!(!mgr.barrier().is_unsealed().await);
    }

    // ── generations ──────────────────────────────────────────────────

    #[tokio::test]
    async fn adding_a_wrapper_rewraps_stored_keys() {
        let storage = Arc::new(MemoryBackend::new());
        let a = Arc::new(AeadWrapper::generate("key-a"));
        let b = Arc::new(AeadWrapper::generate("key-b"));
        let mgr = manager(&storage, aead_access(1, &[("a", &a)])).await;
        mgr.init(3, 2).await.unwrap();
        mgr.unseal_with_stored_keys().await.unwrap();

        mgr.reconfigure(aead_access(2, &[("a", &a), ("b", &b)]))
            .await
            .unwrap();

        assert_eq!(stored_generation(&storage, STORED_BARRIER_KEYS_PATH).await, 2);
        assert_eq!(stored_generation(&storage, RECOVERY_KEY_PATH).await, 2);
        let entry = storage.get(STORED_BARRIER_KEYS_PATH).await.unwrap().unwrap();
        let value = unmarshal_seal_wrapped_value(&entry.value).unwrap();
        assert_eq!(value.value().slots.len(), 2);

        let stored = generation::load(storage.as_ref()).await.unwrap().unwrap();
        assert_eq!(stored.generation, 2);
        assert!(stored.is_rewrapped());
    }

    #[tokio::test]
    async fn changed_seals_without_generation_bump_are_rejected() {
        let storage = Arc::new(MemoryBackend::new());
        let a = Arc::new(AeadWrapper::generate("key-a"));
        let b = Arc::new(AeadWrapper::generate("key-b"));
        let mgr = manager(&storage, aead_access(1, &[("a", &a)])).await;
        mgr.init(1, 1).await.unwrap();

        let err = mgr
            .reconfigure(aead_access(1, &[("a", &a), ("b", &b)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SealError::Generation(GenerationError::SealsChangedWithoutGeneration)
        ));
        assert_eq!(mgr.access().await.all_seal_info_by_priority().len(), 1);
    }

    #[tokio::test]
    async fn second_change_waits_for_rewrap() {
        let storage = Arc::new(MemoryBackend::new());
        let a = Arc::new(AeadWrapper::generate("key-a"));
        let b = Arc::new(AeadWrapper::generate("key-b"));
        let c = Arc::new(AeadWrapper::generate("key-c"));
        let mgr = manager(&storage, aead_access(1, &[("a", &a)])).await;
        mgr.init(1, 1).await.unwrap();

        // Sealed, so generation 2 cannot be rewrapped yet.
        mgr.reconfigure(aead_access(2, &[("a", &a), ("b", &b)]))
            .await
            .unwrap();
        let err = mgr
            .reconfigure(aead_access(3, &[("a", &a), ("b", &b), ("c", &c)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SealError::Generation(GenerationError::RewrapInProgress)
        ));

        mgr.unseal_with_stored_keys().await.unwrap();
        assert!(mgr.status().await.unwrap().rewrapped);
        mgr.reconfigure(aead_access(3, &[("a", &a), ("b", &b), ("c", &c)]))
            .await
            .unwrap();
        assert_eq!(stored_generation(&storage, STORED_BARRIER_KEYS_PATH).await, 3);
    }

    #[tokio::test]
    async fn restart_with_new_generation_rewraps_on_unseal() {
        let storage = Arc::new(MemoryBackend::new());
        let a = Arc::new(AeadWrapper::generate("key-a"));
        let b = Arc::new(AeadWrapper::generate("key-b"));
        let first = manager(&storage, aead_access(1, &[("a", &a)])).await;
        first.init(1, 1).await.unwrap();
        drop(first);

        let restarted = manager(&storage, aead_access(2, &[("a", &a), ("b", &b)])).await;
        assert!(!restarted.status().await.unwrap().rewrapped);
        restarted.unseal_with_stored_keys().await.unwrap();

        assert_eq!(stored_generation(&storage, STORED_BARRIER_KEYS_PATH).await, 2);
        assert!(restarted.status().await.unwrap().rewrapped);
    }

    #[tokio::test]
    async fn generation_regression_is_rejected_at_start() {
        let storage = Arc::new(MemoryBackend::new());
        let a = Arc::new(AeadWrapper::generate("key-a"));
        let mgr = manager(&storage, aead_access(2, &[("a", &a)])).await;
        mgr.init(1, 1).await.unwrap();

        let storage_dyn = Arc::clone(&storage) as Arc<dyn StorageBackend>;
        let barrier = Arc::new(Barrier::new(Arc::clone(&storage_dyn)));
        let err = SealManager::start(storage_dyn, barrier, aead_access(1, &[("a", &a)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SealError::Generation(GenerationError::GenerationRegressed { new: 1, existing: 2 })
        ));
    }

    #[tokio::test]
    async fn migrating_from_shamir_to_auto_seal() {
        let storage = Arc::new(MemoryBackend::new());
        let mgr = manager(&storage, shamir_access(1)).await;
        let result = mgr.init(3, 2).await.unwrap();
        unseal_with(&mgr, &result.unseal_shares[..2]).await;
        mgr.barrier().put("kv/a", b"data").await.unwrap();

        let a = Arc::new(AeadWrapper::generate("key-a"));
        mgr.reconfigure(aead_access(2, &[("a", &a)])).await.unwrap();
        assert!(!mgr.access().await.is_shamir());

        mgr.seal().await.unwrap();
        mgr.unseal_with_stored_keys().await.unwrap();
        assert_eq!(mgr.barrier().get("kv/a").await.unwrap(), Some(b"data".to_vec()));
    }

    #[tokio::test]
    async fn restart_away_from_shamir_is_refused_and_leaves_vault_usable() {
        let storage = Arc::new(MemoryBackend::new());
        let first = manager(&storage, shamir_access(1)).await;
        let result = first.init(3, 2).await.unwrap();
        drop(first);

        let a = Arc::new(AeadWrapper::generate("key-a"));
        let storage_dyn = Arc::clone(&storage) as Arc<dyn StorageBackend>;
        let barrier = Arc::new(Barrier::new(Arc::clone(&storage_dyn)));
        let err = SealManager::start(storage_dyn, barrier, aead_access(2, &[("a", &a)]))
            .await
            .unwrap_err();
        assert!(matches!(err, SealError::MigrationRequiresUnseal { .. }), "{err}");

        let stored = generation::load(storage.as_ref()).await.unwrap().unwrap();
        assert_eq!(stored.generation, 1);
        assert!(stored.is_shamir());

        // The original configuration still starts and unseals.
        let restarted = manager(&storage, shamir_access(1)).await;
        unseal_with(&restarted, &result.unseal_shares[..2]).await;
        assert!(restarted.barrier().is_unsealed().await);

        restarted
            .reconfigure(aead_access(2, &[("a", &a)]))
            .await
            .unwrap();
        restarted.seal().await.unwrap();
        restarted.unseal_with_stored_keys().await.unwrap();
    }

    #[tokio::test]
    async fn sealed_reconfigure_away_from_shamir_is_refused() {
        let storage = Arc::new(MemoryBackend::new());
        let mgr = manager(&storage, shamir_access(1)).await;
        let result = mgr.init(3, 2).await.unwrap();
        let before = storage.get(STORED_BARRIER_KEYS_PATH).await.unwrap().unwrap();

        let a = Arc::new(AeadWrapper::generate("key-a"));
        let err = mgr
            .reconfigure(aead_access(2, &[("a", &a)]))
            .await
            .unwrap_err();
        assert!(matches!(err, SealError::MigrationRequiresUnseal { .. }), "{err}");
        assert!(mgr.access().await.is_shamir());
        assert_eq!(generation::load(storage.as_ref()).await.unwrap().unwrap().generation, 1);
        let after = storage.get(STORED_BARRIER_KEYS_PATH).await.unwrap().unwrap();
        assert_eq!(before.value, after.value);

        unseal_with(&mgr, &result.unseal_shares[..2]).await;
        mgr.reconfigure(aead_access(2, &[("a", &a)])).await.unwrap();
        assert_eq!(stored_generation(&storage, STORED_BARRIER_KEYS_PATH).await, 2);
        assert!(mgr.status().await.unwrap().rewrapped);
    }

    #[tokio::test]
    async fn uninitialized_shamir_vault_can_switch_to_auto_seal_while_sealed() {
        let storage = Arc::new(MemoryBackend::new());
        let mgr = manager(&storage, shamir_access(1)).await;

        let a = Arc::new(AeadWrapper::generate("key-a"));
        mgr.reconfigure(aead_access(2, &[("a", &a)])).await.unwrap();
        mgr.init(1, 1).await.unwrap();
        mgr.unseal_with_stored_keys().await.unwrap();
    }

    #[tokio::test]
    async fn health_checks_follow_reconfiguration() {
        fn test_access(generation: u64, wrappers: &[(&str, &Arc<TestWrapper>)]) -> Access {
            let seals = wrappers
                .iter()
                .zip(1..)
                .map(|((name, _), priority)| SealDescriptor::new("test", *name, priority))
                .collect();
            let wrappers = wrappers
                .iter()
                .zip(1..)
                .map(|((name, w), priority)| seal_wrapper(w, name, priority))
                .collect();
            Access::new(SealGenerationInfo::new(generation, seals), wrappers).unwrap()
        }

        let a = TestWrapper::new("key-a");
        let b = TestWrapper::new("key-b");
        b.set_fail_encrypt(true);

        let storage = Arc::new(MemoryBackend::new());
        let mgr = Arc::new(manager(&storage, test_access(1, &[("a", &a)])).await);
        let (tx, rx) = watch::channel(false);
        let handle = Arc::clone(&mgr).spawn_health_checks(
            Duration::from_millis(10),
            Duration::from_secs(1),
            rx,
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(mgr.access().await.all_seals_healthy());

        mgr.reconfigure(test_access(2, &[("a", &a), ("b", &b)]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let access = mgr.access().await;
        let b_health = access.all_seal_info_by_priority()[1].health();
        assert!(!b_health.healthy);
        assert!(b_health.last_health_check.is_some());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn rewrap_requires_unsealed_vault() {
        let mgr = shamir_manager().await;
        mgr.init(2, 2).await.unwrap();
        assert!(matches!(
            mgr.rewrap().await,
            Err(SealError::Barrier(BarrierError::Sealed))
        ));
    }

    #[tokio::test]
    async fn seal_manager_debug_does_not_leak() {
        let mgr = shamir_manager().await;
        let debug = format!("{mgr:?}");
        assert!(debug.contains("SealManager"));
        assert!(!debug.contains("pending_shares"));
    }
}
