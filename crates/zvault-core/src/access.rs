//! Multi-wrapper seal access.
//!
//! [`Access`] owns the ordered set of [`SealWrapper`]s that make up a seal and
//! the [`SealGenerationInfo`] they were built from. It is the only component
//! that encrypts or decrypts through wrappers:
//!
//! - **Encrypt** fans out to every enabled wrapper in priority order and
//!   succeeds if at least one wrapper produced a slot. Failed wrappers are
//!   reported alongside the result and flagged unhealthy.
//! - **Decrypt** first tries wrappers whose current key ID matches a slot,
//!   then every remaining wrapper/slot pair, and stops at the first success.
//!   A wrapper that could only decrypt with a retired key ends the search
//!   immediately with an out-of-date result.
//! - **Init** is fail-fast: a wrapper that cannot start is a configuration
//!   error.
//!
//! Every wrapper call can be bounded by a timeout, taken from
//! [`WrapOptions::timeout`] or the access's own call timeout. A call that
//! runs out of time is recorded as [`WrapperError::Timeout`] for that
//! wrapper and the fan-out moves on, so slots already produced are kept.
//!
//! The wrapper list is immutable once built; reconfiguration constructs a
//! new `Access`. The cache of key IDs produced by the enabled wrappers is an
//! immutable snapshot swapped wholesale on refresh.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::error::{AccessError, WrapperError, WrapperErrors};
use crate::generation::{SealDescriptor, SealGenerationInfo};
use crate::seal_wrapper::SealWrapper;
use crate::wrapped_value::MultiWrapValue;
use crate::wrapping::{BlobInfo, ShamirKeyed, WrapOptions, Wrapper};

/// Seal type reported when more than one wrapper is enabled.
pub const MULTISEAL_TYPE: &str = "multiseal";

/// Consecutive unhealthy health-check ticks before logging at `error`.
pub const UNHEALTHY_ESCALATION_TICKS: u32 = 5;

/// Result of [`Access::encrypt`].
#[derive(Debug)]
pub struct Encrypted {
    /// One slot per wrapper that succeeded.
    pub value: MultiWrapValue,
    /// Wrappers that failed. Non-empty means a partial failure.
    pub errors: WrapperErrors,
}

/// Result of [`Access::decrypt`].
pub struct Decrypted {
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Whether the value matches the current generation and key IDs.
    pub is_up_to_date: bool,
}

impl fmt::Debug for Decrypted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decrypted")
            .field("plaintext", &"[REDACTED]")
            .field("is_up_to_date", &self.is_up_to_date)
            .finish()
    }
}

/// Sorted, de-duplicated key IDs of the enabled wrappers.
#[derive(Default)]
struct KeyIdSet(RwLock<Arc<Vec<String>>>);

impl KeyIdSet {
    fn get(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.0.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn set(&self, ids: Vec<String>) {
        let snapshot = Arc::new(normalize(ids));
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn set_from_slots(&self, slots: &[BlobInfo]) {
        self.set(slot_key_ids(slots));
    }
}

fn slot_key_ids(slots: &[BlobInfo]) -> Vec<String> {
    slots.iter().map(|s| s.key_id().to_owned()).collect()
}

fn normalize(mut ids: Vec<String>) -> Vec<String> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Outcome of one wrapper/slot decryption attempt.
enum Attempt {
    Decrypted(Zeroizing<Vec<u8>>),
    OldKey(Zeroizing<Vec<u8>>),
    Failed(WrapperError),
}

/// The set of wrappers protecting the barrier keys and other seal-wrapped
/// values.
pub struct Access {
    wrappers: Vec<Arc<SealWrapper>>,
    generation_info: SealGenerationInfo,
    key_ids: KeyIdSet,
    call_timeout: Option<Duration>,
}

impl Access {
    /// Build an access from a generation descriptor and its wrappers.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NoWrappers`] if `wrappers` is empty.
    /// - [`AccessError::DuplicateWrapper`] if two wrappers share a name.
    pub fn new(
        generation_info: SealGenerationInfo,
        wrappers: Vec<SealWrapper>,
    ) -> Result<Self, AccessError> {
        if wrappers.is_empty() {
            return Err(AccessError::NoWrappers);
        }
        let mut names = HashSet::new();
        for sw in &wrappers {
            if !names.insert(sw.name().to_owned()) {
                return Err(AccessError::DuplicateWrapper {
                    name: sw.name().to_owned(),
                });
            }
        }

        let mut wrappers: Vec<Arc<SealWrapper>> = wrappers.into_iter().map(Arc::new).collect();
        wrappers.sort_by_key(|sw| sw.priority());

        Ok(Self {
            wrappers,
            generation_info,
            key_ids: KeyIdSet::default(),
            call_timeout: None,
        })
    }

    /// Bound each wrapper call by `timeout` unless the call's
    /// [`WrapOptions`] carry their own.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Default deadline applied to each wrapper call, if any.
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Build a single-wrapper access at `generation`.
    ///
    /// # Errors
    ///
    /// As [`Access::new`].
    pub fn from_wrapper(
        generation: u64,
        name: &str,
        wrapper: Arc<dyn Wrapper>,
    ) -> Result<Self, AccessError> {
        let descriptor = SealDescriptor::new(wrapper.wrapper_type(), name, 1);
        let sw = SealWrapper::from_descriptor(&descriptor, wrapper);
        Self::new(SealGenerationInfo::new(generation, vec![descriptor]), vec![sw])
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation_info.generation
    }

    #[must_use]
    pub fn generation_info(&self) -> &SealGenerationInfo {
        &self.generation_info
    }

    /// Type of the seal: the single enabled wrapper's type, or
    /// [`MULTISEAL_TYPE`].
    #[must_use]
    pub fn seal_type(&self) -> &str {
        let mut enabled = self.wrappers.iter().filter(|sw| !sw.is_disabled());
        match (enabled.next(), enabled.next()) {
            (Some(only), None) => only.seal_config_type(),
            (Some(_), Some(_)) => MULTISEAL_TYPE,
            (None, _) => self.wrappers.first().map_or("", |sw| sw.seal_config_type()),
        }
    }

    /// Whether the highest-priority wrapper is Shamir-backed.
    #[must_use]
    pub fn is_shamir(&self) -> bool {
        self.wrappers
            .first()
            .is_some_and(|sw| sw.wrapper().as_shamir().is_some())
    }

    /// Every wrapper, lowest priority value first.
    #[must_use]
    pub fn all_seal_info_by_priority(&self) -> Vec<Arc<SealWrapper>> {
        self.wrappers.clone()
    }

    /// Enabled wrappers, lowest priority value first.
    #[must_use]
    pub fn enabled_seal_info_by_priority(&self) -> Vec<Arc<SealWrapper>> {
        self.wrappers
            .iter()
            .filter(|sw| !sw.is_disabled())
            .cloned()
            .collect()
    }

    /// Whether every enabled wrapper is healthy. Disabled wrappers are ignored.
    #[must_use]
    pub fn all_seals_healthy(&self) -> bool {
        self.wrappers
            .iter()
            .filter(|sw| !sw.is_disabled())
            .all(|sw| sw.is_healthy())
    }

    /// Snapshot of the cached key IDs.
    #[must_use]
    pub fn cached_key_ids(&self) -> Arc<Vec<String>> {
        self.key_ids.get()
    }

    /// Encrypt `plaintext` with every enabled wrapper.
    ///
    /// On success the returned [`Encrypted::errors`] lists the wrappers that
    /// failed; callers decide whether a reduced slot set is acceptable. The
    /// key ID cache is refreshed from the produced slots.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NoEnabledWrappers`] if every wrapper is disabled.
    /// - [`AccessError::EncryptionFailed`] if no wrapper succeeded, naming
    ///   each wrapper's error.
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        opts: &WrapOptions,
    ) -> Result<Encrypted, AccessError> {
        let enabled = self.enabled_seal_info_by_priority();
        if enabled.is_empty() {
            return Err(AccessError::NoEnabledWrappers);
        }

        let mut slots = Vec::with_capacity(enabled.len());
        let mut errors = WrapperErrors::new();
        let limit = self.limit(opts);
        for sw in &enabled {
            match bounded(limit, sw.encrypt(plaintext, opts)).await {
                Ok(blob) => slots.push(blob),
                Err(err) => {
                    let was_healthy = sw.mark_unhealthy();
                    warn!(
                        wrapper = sw.name(),
                        error = %err,
                        was_healthy,
                        "seal wrapper failed to encrypt"
                    );
                    errors.insert(sw.name(), err);
                }
            }
        }

        if slots.is_empty() {
            return Err(AccessError::EncryptionFailed { errors });
        }

        self.key_ids.set_from_slots(&slots);
        Ok(Encrypted {
            value: MultiWrapValue {
                generation: self.generation(),
                slots,
            },
            errors,
        })
    }

    /// Decrypt a multi-wrap value.
    ///
    /// `is_up_to_date` is computed once, before any attempt, from the cached
    /// key IDs; an old-key result always reports `false`.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NoSlots`] for an empty value.
    /// - [`AccessError::DecryptionFailed`] when every attempt failed, naming
    ///   each wrapper's first error.
    pub async fn decrypt(
        &self,
        value: &MultiWrapValue,
        opts: &WrapOptions,
    ) -> Result<Decrypted, AccessError> {
        if value.slots.is_empty() {
            return Err(AccessError::NoSlots);
        }
        let is_up_to_date = self.is_up_to_date(value, false).await?;

        let mut slot_by_key_id: HashMap<&str, usize> = HashMap::new();
        for (idx, slot) in value.slots.iter().enumerate() {
            slot_by_key_id.entry(slot.key_id()).or_insert(idx);
        }

        let limit = self.limit(opts);
        let mut errors = WrapperErrors::new();
        let mut attempted: HashSet<(usize, usize)> = HashSet::new();

        for (w_idx, sw) in self.wrappers.iter().enumerate() {
            let key_id = match bounded(limit, sw.key_id()).await {
                Ok(key_id) => key_id,
                Err(err) => {
                    errors.insert(sw.name(), err);
                    continue;
                }
            };
            let Some(&s_idx) = slot_by_key_id.get(key_id.as_str()) else {
                continue;
            };
            attempted.insert((w_idx, s_idx));
            match Self::try_decrypt(sw, &value.slots[s_idx], opts, limit).await {
                Attempt::Decrypted(plaintext) => {
                    return Ok(Decrypted {
                        plaintext,
                        is_up_to_date,
                    });
                }
                Attempt::OldKey(plaintext) => return Ok(Self::old_key(sw, plaintext)),
                Attempt::Failed(err) => errors.insert(sw.name(), err),
            }
        }

        debug!(
            slots = value.slots.len(),
            "no key ID match decrypted the value, trying every wrapper against every slot"
        );

        for (w_idx, sw) in self.wrappers.iter().enumerate() {
            for (s_idx, slot) in value.slots.iter().enumerate() {
                if attempted.contains(&(w_idx, s_idx)) {
                    continue;
                }
                match Self::try_decrypt(sw, slot, opts, limit).await {
                    Attempt::Decrypted(plaintext) => {
                        return Ok(Decrypted {
                            plaintext,
                            is_up_to_date,
                        });
                    }
                    Attempt::OldKey(plaintext) => return Ok(Self::old_key(sw, plaintext)),
                    Attempt::Failed(err) => errors.insert(sw.name(), err),
                }
            }
        }

        Err(AccessError::DecryptionFailed { errors })
    }

    async fn try_decrypt(
        sw: &SealWrapper,
        slot: &BlobInfo,
        opts: &WrapOptions,
        limit: Option<Duration>,
    ) -> Attempt {
        match bounded(limit, sw.decrypt(slot, opts)).await {
            Ok(plaintext) => Attempt::Decrypted(Zeroizing::new(plaintext)),
            Err(err) => match err.into_old_key_plaintext() {
                Ok(plaintext) => Attempt::OldKey(plaintext.into_inner()),
                Err(err) => Attempt::Failed(err),
            },
        }
    }

    fn limit(&self, opts: &WrapOptions) -> Option<Duration> {
        opts.timeout.or(self.call_timeout)
    }

    fn old_key(sw: &SealWrapper, plaintext: Zeroizing<Vec<u8>>) -> Decrypted {
        debug!(wrapper = sw.name(), "value decrypted with an old key");
        Decrypted {
            plaintext,
            is_up_to_date: false,
        }
    }

    /// Whether `value` was written under the current generation and by the
    /// current set of wrapper keys.
    ///
    /// Values with generation 0 (read from the legacy single-blob form) skip
    /// the generation comparison. With `force_key_id_refresh`, a throwaway
    /// encryption re-reads every enabled wrapper's key ID first; partial
    /// failures there are logged and tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::EncryptionFailed`] or
    /// [`AccessError::NoEnabledWrappers`] if the forced refresh produced
    /// nothing.
    pub async fn is_up_to_date(
        &self,
        value: &MultiWrapValue,
        force_key_id_refresh: bool,
    ) -> Result<bool, AccessError> {
        if value.generation != 0 && value.generation != self.generation() {
            return Ok(false);
        }

        if force_key_id_refresh {
            match self.encrypt(&[0], &WrapOptions::default()).await {
                Ok(refresh) => {
                    if !refresh.errors.is_empty() {
                        warn!(
                            errors = %refresh.errors,
                            "error encrypting test value, seals may not be healthy"
                        );
                    }
                    debug!(key_ids = ?self.key_ids.get(), "refreshed seal key IDs");
                }
                Err(err) => {
                    error!(error = %err, "cannot determine key IDs of seal wrappers");
                    return Err(err);
                }
            }
        }

        let current = self.key_ids.get();
        Ok(*current == normalize(slot_key_ids(&value.slots)))
    }

    /// Install the combined Shamir key on the highest-priority wrapper.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotShamir`] if that wrapper is not Shamir-backed.
    /// - [`AccessError::Wrapper`] if the key is rejected.
    pub fn set_shamir_seal_key(&self, key: &[u8]) -> Result<(), AccessError> {
        let (sw, shamir) = self.shamir()?;
        shamir
            .set_key_bytes(key)
            .map_err(|source| AccessError::Wrapper {
                name: sw.name().to_owned(),
                source,
            })
    }

    /// Replace the Shamir key, keeping the current one for old-key
    /// decryption until values are rewrapped.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotShamir`] if that wrapper is not Shamir-backed.
    /// - [`AccessError::Wrapper`] if the key is rejected.
    pub fn rotate_shamir_seal_key(&self, key: &[u8]) -> Result<(), AccessError> {
        let (sw, shamir) = self.shamir()?;
        shamir
            .rotate_key_bytes(key)
            .map_err(|source| AccessError::Wrapper {
                name: sw.name().to_owned(),
                source,
            })
    }

    /// Key bytes of the highest-priority (Shamir) wrapper.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotShamir`] if that wrapper is not Shamir-backed.
    /// - [`AccessError::Wrapper`] if no key is installed.
    pub fn shamir_key_bytes(&self) -> Result<Zeroizing<Vec<u8>>, AccessError> {
        let (sw, shamir) = self.shamir()?;
        shamir.key_bytes().map_err(|source| AccessError::Wrapper {
            name: sw.name().to_owned(),
            source,
        })
    }

    fn shamir(&self) -> Result<(&SealWrapper, &dyn ShamirKeyed), AccessError> {
        let sw = self.wrappers.first().ok_or(AccessError::NotShamir)?;
        let shamir = sw.wrapper().as_shamir().ok_or(AccessError::NotShamir)?;
        Ok((sw.as_ref(), shamir))
    }

    /// Initialize every wrapper, then seed the key ID cache.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Init`] for the first wrapper that fails.
    pub async fn init(&self) -> Result<(), AccessError> {
        for sw in &self.wrappers {
            bounded(self.call_timeout, sw.wrapper().init())
                .await
                .map_err(|source| AccessError::Init {
                    name: sw.name().to_owned(),
                    source,
                })?;
        }

        let mut ids = Vec::new();
        for sw in self.wrappers.iter().filter(|sw| !sw.is_disabled()) {
            let key_id = bounded(self.call_timeout, sw.key_id())
                .await
                .map_err(|source| AccessError::Init {
                    name: sw.name().to_owned(),
                    source,
                })?;
            ids.push(key_id);
        }
        self.key_ids.set(ids);

        info!(
            generation = self.generation(),
            wrappers = self.wrappers.len(),
            seal_type = self.seal_type(),
            "seal access initialized"
        );
        Ok(())
    }

    /// Finalize every wrapper, attempting all of them.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Finalize`] naming each wrapper that failed.
    pub async fn finalize(&self) -> Result<(), AccessError> {
        let mut errors = WrapperErrors::new();
        for sw in &self.wrappers {
            if let Err(err) = bounded(self.call_timeout, sw.wrapper().finalize()).await {
                errors.insert(sw.name(), err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AccessError::Finalize { errors })
        }
    }

    /// Check every enabled wrapper with a one-byte encryption bounded by
    /// `timeout`, recording the outcome on each wrapper. Returns
    /// [`all_seals_healthy`](Self::all_seals_healthy) afterwards.
    ///
    /// A Shamir wrapper without a key is waiting for unseal shares, not
    /// failing, and is left out.
    pub async fn check_health(&self, timeout: Duration) -> bool {
        for sw in self.wrappers.iter().filter(|sw| !sw.is_disabled()) {
            if sw
                .wrapper()
                .as_shamir()
                .is_some_and(|shamir| shamir.key_bytes().is_err())
            {
                debug!(wrapper = sw.name(), "skipping health check of unkeyed Shamir seal");
                continue;
            }
            let check = bounded(Some(timeout), sw.encrypt(&[0], &WrapOptions::default())).await;
            let healthy = match check {
                Ok(_) => true,
                Err(err) => {
                    warn!(wrapper = sw.name(), error = %err, "seal health check failed");
                    false
                }
            };
            let was_healthy = sw.record_health_check(healthy, Utc::now());
            match (was_healthy, healthy) {
                (false, true) => info!(wrapper = sw.name(), "seal wrapper is healthy again"),
                (true, false) => warn!(wrapper = sw.name(), "seal wrapper became unhealthy"),
                _ => {}
            }
        }
        self.all_seals_healthy()
    }

    /// Run [`check_health`](Self::check_health) every `interval` until
    /// `shutdown` changes. Each check is bounded by `timeout`.
    ///
    /// Persistent failures escalate from `warn` to `error` after
    /// [`UNHEALTHY_ESCALATION_TICKS`] consecutive unhealthy ticks.
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
                    _ = ticker.tick() => streak.record(self.check_health(timeout).await),
                    _ = shutdown.changed() => {
                        info!("seal health checks shutting down");
                        return;
                    }
                }
            }
        })
    }
}

/// Counts consecutive unhealthy health-check ticks and logs them, escalating
/// to `error` after [`UNHEALTHY_ESCALATION_TICKS`].
#[derive(Debug, Default)]
pub(crate) struct UnhealthyStreak(u32);

impl UnhealthyStreak {
    pub(crate) fn record(&mut self, healthy: bool) {
        if healthy {
            self.0 = 0;
            return;
        }
        self.0 = self.0.saturating_add(1);
        if self.0 >= UNHEALTHY_ESCALATION_TICKS {
            error!(consecutive_unhealthy = self.0, "seal wrappers persistently unhealthy");
        } else {
            warn!(consecutive_unhealthy = self.0, "not all seal wrappers are healthy");
        }
    }
}

/// Run a wrapper call, failing with [`WrapperError::Timeout`] if `limit`
/// elapses first.
async fn bounded<T>(
    limit: Option<Duration>,
    call: impl Future<Output = Result<T, WrapperError>>,
) -> Result<T, WrapperError> {
    let Some(limit) = limit else {
        return call.await;
    };
    tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
        Err(WrapperError::Timeout {
            millis: limit.as_millis(),
        })
    })
}

impl fmt::Debug for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Access")
            .field("generation", &self.generation())
            .field("call_timeout", &self.call_timeout)
            .field("wrappers", &self.wrappers)
            .finish_non_exhaustive()
    }
}
