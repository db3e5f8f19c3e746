//! Seal generations.
//!
//! A [`SealGenerationInfo`] is the declarative snapshot of which seals are
//! configured, stamped with a generation number that increases by one per
//! accepted reconfiguration. Every seal-wrapped value records the generation
//! it was written under, which is how stale values are found for rewrapping.
//!
//! Transitions are deliberately narrow: at most one seal added and one
//! removed per generation, and at least one seal kept, so that every stored
//! value stays decryptable across the change. Leaving a Shamir seal is the
//! exception, since a Shamir seal cannot be disabled and so can only be
//! replaced outright.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;
use zvault_storage::{Entry, StorageBackend};

use crate::error::GenerationError;
use crate::wrapping::SHAMIR_SEAL_TYPE;

/// Storage path of the persisted seal generation info.
pub const SEAL_GEN_INFO_PATH: &str = "core/seal-gen-info";

/// Declarative description of one configured seal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealDescriptor {
    /// Wrapper type tag, e.g. `shamir`, `aead`, `awskms`.
    #[serde(rename = "type")]
    pub seal_type: String,
    /// Unique seal name.
    pub name: String,
    /// Lower is tried first.
    pub priority: i32,
    /// Disabled seals decrypt but never encrypt.
    #[serde(default)]
    pub disabled: bool,
}

impl SealDescriptor {
    /// An enabled seal descriptor.
    pub fn new(seal_type: impl Into<String>, name: impl Into<String>, priority: i32) -> Self {
        Self {
            seal_type: seal_type.into(),
            name: name.into(),
            priority,
            disabled: false,
        }
    }

    /// Mark the descriptor disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    #[must_use]
    pub fn is_shamir(&self) -> bool {
        self.seal_type == SHAMIR_SEAL_TYPE
    }

    /// Identity ignoring priority and enablement.
    fn identity(&self) -> (&str, &str) {
        (self.seal_type.as_str(), self.name.as_str())
    }
}

/// Versioned snapshot of the configured seal set.
#[derive(Debug)]
pub struct SealGenerationInfo {
    pub generation: u64,
    pub seals: Vec<SealDescriptor>,
    rewrapped: AtomicBool,
}

/// On-disk form of [`SealGenerationInfo`].
#[derive(Serialize, Deserialize)]
struct PersistedSealGenerationInfo {
    generation: u64,
    seals: Vec<SealDescriptor>,
    rewrapped: bool,
}

impl SealGenerationInfo {
    /// A generation that has not yet been rewrapped.
    #[must_use]
    pub fn new(generation: u64, seals: Vec<SealDescriptor>) -> Self {
        Self {
            generation,
            seals,
            rewrapped: AtomicBool::new(false),
        }
    }

    /// Whether every stored seal-wrapped value has been migrated to this
    /// generation.
    #[must_use]
    pub fn is_rewrapped(&self) -> bool {
        self.rewrapped.load(Ordering::Acquire)
    }

    pub fn set_rewrapped(&self, rewrapped: bool) {
        self.rewrapped.store(rewrapped, Ordering::Release);
    }

    /// Whether any configured seal is a Shamir seal.
    #[must_use]
    pub fn is_shamir(&self) -> bool {
        self.seals.iter().any(SealDescriptor::is_shamir)
    }

    /// Check this (candidate) generation against the stored one.
    ///
    /// # Errors
    ///
    /// - [`GenerationError::InvalidSeals`] for an empty list, duplicate
    ///   names, more than one Shamir seal, a disabled Shamir seal, a Shamir
    ///   seal mixed with other seals, or no enabled seal.
    /// - [`GenerationError::SealsChangedWithoutGeneration`] when the
    ///   generation matches but the seals differ.
    /// - [`GenerationError::GenerationRegressed`] for a lower generation.
    /// - [`GenerationError::RewrapInProgress`] when the stored generation has
    ///   not finished rewrapping (not checked when leaving Shamir).
    /// - [`GenerationError::TooManyAdded`] / [`GenerationError::TooManyRemoved`]
    ///   for more than one addition or removal.
    /// - [`GenerationError::NoCommonSeal`] when nothing is kept.
    pub fn validate(&self, existing: Option<&SealGenerationInfo>) -> Result<(), GenerationError> {
        validate_seal_list(&self.seals)?;

        let Some(existing) = existing else {
            return Ok(());
        };

        if self.generation == existing.generation {
            if !have_matching_seals(&self.seals, &existing.seals) {
                return Err(GenerationError::SealsChangedWithoutGeneration);
            }
            return Ok(());
        }
        if self.generation < existing.generation {
            return Err(GenerationError::GenerationRegressed {
                new: self.generation,
                existing: existing.generation,
            });
        }

        let previous_shamir = existing.is_shamir();
        if !previous_shamir && !existing.is_rewrapped() {
            return Err(GenerationError::RewrapInProgress);
        }

        let existing_len = existing.seals.len();
        let new_len = self.seals.len();

        // Leaving Shamir replaces the whole set.
        let to_add = if previous_shamir {
            new_len
        } else {
            new_len.saturating_sub(existing_len)
        };
        let to_delete = existing_len.saturating_sub(new_len);

        if to_add > 1 {
            return Err(GenerationError::TooManyAdded);
        }
        if to_delete > 1 {
            return Err(GenerationError::TooManyRemoved);
        }
        if !previous_shamir && !have_common_seal(&existing.seals, &self.seals) {
            return Err(GenerationError::NoCommonSeal);
        }
        Ok(())
    }

    /// Serialize for storage.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<Vec<u8>, GenerationError> {
        let persisted = PersistedSealGenerationInfo {
            generation: self.generation,
            seals: self.seals.clone(),
            rewrapped: self.is_rewrapped(),
        };
        serde_json::to_vec(&persisted).map_err(|e| GenerationError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Parse the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Serialization`] if the bytes are not a valid
    /// descriptor.
    pub fn from_json(bytes: &[u8]) -> Result<Self, GenerationError> {
        let persisted: PersistedSealGenerationInfo =
            serde_json::from_slice(bytes).map_err(|e| GenerationError::Serialization {
                reason: e.to_string(),
            })?;
        let info = Self::new(persisted.generation, persisted.seals);
        info.set_rewrapped(persisted.rewrapped);
        Ok(info)
    }
}

impl Clone for SealGenerationInfo {
    fn clone(&self) -> Self {
        let info = Self::new(self.generation, self.seals.clone());
        info.set_rewrapped(self.is_rewrapped());
        info
    }
}

impl PartialEq for SealGenerationInfo {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation
            && self.seals == other.seals
            && self.is_rewrapped() == other.is_rewrapped()
    }
}

/// Load the stored generation info, if any.
///
/// # Errors
///
/// Returns [`GenerationError::Storage`] or [`GenerationError::Serialization`].
pub async fn load(storage: &dyn StorageBackend) -> Result<Option<SealGenerationInfo>, GenerationError> {
    match storage.get(SEAL_GEN_INFO_PATH).await? {
        Some(entry) => Ok(Some(SealGenerationInfo::from_json(&entry.value)?)),
        None => Ok(None),
    }
}

/// Persist `info`, replacing any stored generation.
///
/// # Errors
///
/// Returns [`GenerationError::Storage`] or [`GenerationError::Serialization`].
pub async fn store(
    storage: &dyn StorageBackend,
    info: &SealGenerationInfo,
) -> Result<(), GenerationError> {
    storage
        .put(&Entry::new(SEAL_GEN_INFO_PATH, info.to_json()?))
        .await?;
    debug!(
        generation = info.generation,
        rewrapped = info.is_rewrapped(),
        "seal generation info stored"
    );
    Ok(())
}

fn validate_seal_list(seals: &[SealDescriptor]) -> Result<(), GenerationError> {
    let invalid = |reason: &str| GenerationError::InvalidSeals {
        reason: reason.to_owned(),
    };

    if seals.is_empty() {
        return Err(invalid("at least one seal must be configured"));
    }

    let mut names = BTreeSet::new();
    for seal in seals {
        if seal.name.is_empty() {
            return Err(invalid("seal names must not be empty"));
        }
        if !names.insert(seal.name.as_str()) {
            return Err(GenerationError::InvalidSeals {
                reason: format!("duplicate seal name '{}'", seal.name),
            });
        }
    }

    let shamir_count = seals.iter().filter(|s| s.is_shamir()).count();
    if shamir_count > 1 {
        return Err(invalid("only one shamir seal may be configured"));
    }
    if shamir_count == 1 {
        if seals.len() > 1 {
            return Err(invalid("a shamir seal cannot be combined with other seals"));
        }
        if seals.iter().any(|s| s.is_shamir() && s.disabled) {
            return Err(invalid("shamir seals cannot be set disabled"));
        }
    }
    if seals.iter().all(|s| s.disabled) {
        return Err(invalid("at least one seal must be enabled"));
    }
    Ok(())
}

/// Same seals regardless of list order.
fn have_matching_seals(a: &[SealDescriptor], b: &[SealDescriptor]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(|x, y| x.name.cmp(&y.name));
    b.sort_by(|x, y| x.name.cmp(&y.name));
    a == b
}

/// At least one seal present in both lists, ignoring priority and enablement.
fn have_common_seal(existing: &[SealDescriptor], new: &[SealDescriptor]) -> bool {
    let existing: BTreeSet<_> = existing.iter().map(SealDescriptor::identity).collect();
    new.iter().any(|s| existing.contains(&s.identity()))
}
