//! Error types for `zvault-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Errors never include key material or unwrapped plaintext —
//! only wrapper names, storage paths, or operation descriptions.

use std::collections::BTreeMap;
use std::fmt;

use zvault_storage::StorageError;

use crate::wrapping::Plaintext;

/// Message text emitted by wrappers that could only decrypt with a retired key.
pub const OLD_KEY_MESSAGE: &str = "decrypted with old key";

/// Message text emitted when an AEAD tag check fails.
pub const AUTH_FAILED_MESSAGE: &str = "message authentication failed";

/// Errors from cryptographic primitives.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// The GCM tag did not verify (wrong key, wrong AAD, or tampered data).
    #[error("cipher: message authentication failed")]
    Authentication,

    /// A key of the wrong size was supplied.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// A nonce of the wrong size was supplied.
    #[error("invalid nonce length: expected {expected} bytes, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    /// Ciphertext is too short to contain a valid nonce + tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },
}

/// Errors reported by a single wrapper backend.
#[derive(Debug, thiserror::Error)]
pub enum WrapperError {
    /// The value was decrypted, but only with a retired key. Carries the
    /// recovered plaintext so callers can re-encrypt it.
    #[error("decrypted with old key")]
    OldKey { plaintext: Plaintext },

    /// The wrapper rejected the ciphertext's authentication tag.
    #[error("cipher: message authentication failed")]
    AuthenticationFailed,

    /// The wrapper has no key material yet (e.g. Shamir before unseal).
    #[error("wrapper key is not set")]
    KeyNotSet,

    /// The blob handed to the wrapper is structurally unusable.
    #[error("invalid blob: {reason}")]
    InvalidBlob { reason: String },

    /// The wrapper did not answer in time.
    #[error("wrapper timed out after {millis}ms")]
    Timeout { millis: u128 },

    /// A primitive failed inside the wrapper.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Free-form failure from a third-party wrapper. Plugins that predate the
    /// typed variants report the old-key condition as the message
    /// `"decrypted with old key"` together with the plaintext.
    #[error("{message}")]
    Backend {
        message: String,
        plaintext: Option<Plaintext>,
    },
}

impl WrapperError {
    /// Plaintext carried by an old-key signal, typed or legacy.
    #[must_use]
    pub fn old_key_plaintext(&self) -> Option<&Plaintext> {
        match self {
            Self::OldKey { plaintext } => Some(plaintext),
            Self::Backend {
                message,
                plaintext: Some(plaintext),
            } if message == OLD_KEY_MESSAGE => Some(plaintext),
            _ => None,
        }
    }

    /// Take the plaintext out of an old-key signal, or give the error back.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged when it is not an old-key signal.
    pub fn into_old_key_plaintext(self) -> Result<Plaintext, Self> {
        match self {
            Self::OldKey { plaintext } => Ok(plaintext),
            Self::Backend {
                message,
                plaintext: Some(plaintext),
            } if message == OLD_KEY_MESSAGE => Ok(plaintext),
            other => Err(other),
        }
    }

    /// Whether this error means the presented key was wrong.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed | Self::Crypto(CryptoError::Authentication)
        ) || self.to_string().contains(AUTH_FAILED_MESSAGE)
    }
}

/// Per-wrapper errors collected during a fan-out, keyed by wrapper name.
#[derive(Debug, Default)]
pub struct WrapperErrors(BTreeMap<String, WrapperError>);

impl WrapperErrors {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error for `name`. The first error recorded for a wrapper
    /// is kept; later ones are dropped.
    pub fn insert(&mut self, name: impl Into<String>, err: WrapperError) {
        self.0.entry(name.into()).or_insert(err);
    }

    /// Error recorded for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&WrapperError> {
        self.0.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(wrapper name, error)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &WrapperError)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether any wrapper reported an authentication failure.
    #[must_use]
    pub fn has_authentication_failure(&self) -> bool {
        self.0.values().any(WrapperError::is_authentication_failure)
    }
}

impl fmt::Display for WrapperErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no wrappers attempted");
        }
        for (i, (name, err)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{name}: {err}")?;
        }
        Ok(())
    }
}

/// Errors from seal generation validation and persistence.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Same generation number, but a different seal list.
    #[error("existing seal generation is the same, but the configured seals are different")]
    SealsChangedWithoutGeneration,

    /// The previous generation has not finished rewrapping.
    #[error(
        "cannot make seal config changes while seal re-wrap is in progress, please revert any seal configuration changes"
    )]
    RewrapInProgress,

    /// More than one seal added in a single transition.
    #[error("cannot add more than one seal")]
    TooManyAdded,

    /// More than one seal removed in a single transition.
    #[error("cannot delete more than one seal")]
    TooManyRemoved,

    /// No seal survives from the previous generation.
    #[error("must have at least one seal in common with the old generation")]
    NoCommonSeal,

    /// The new generation number is lower than the stored one.
    #[error("seal generation {new} is older than the stored generation {existing}")]
    GenerationRegressed { new: u64, existing: u64 },

    /// The seal list itself is malformed.
    #[error("invalid seal configuration: {reason}")]
    InvalidSeals { reason: String },

    /// The stored descriptor could not be (de)serialized.
    #[error("seal generation serialization failed: {reason}")]
    Serialization { reason: String },

    /// The storage backend failed.
    #[error("seal generation storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the multi-wrapper [`Access`](crate::access::Access).
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// An access must hold at least one wrapper.
    #[error("seal access requires at least one wrapper")]
    NoWrappers,

    /// Two wrappers share a name.
    #[error("duplicate seal wrapper name: {name}")]
    DuplicateWrapper { name: String },

    /// Every wrapper is disabled, so nothing can encrypt.
    #[error("no enabled seal wrappers")]
    NoEnabledWrappers,

    /// Every enabled wrapper failed to encrypt.
    #[error("error seal wrapping value: encryption generated no results: {errors}")]
    EncryptionFailed { errors: WrapperErrors },

    /// No wrapper could decrypt any slot.
    #[error("error decrypting seal wrapped value: {errors}")]
    DecryptionFailed { errors: WrapperErrors },

    /// The value has no slots to decrypt.
    #[error("seal wrapped value has no slots")]
    NoSlots,

    /// The highest-priority wrapper is not Shamir-backed.
    #[error("seal is not a Shamir seal")]
    NotShamir,

    /// A wrapper failed to initialize.
    #[error("error initializing seal wrapper '{name}': {source}")]
    Init { name: String, source: WrapperError },

    /// One or more wrappers failed to finalize.
    #[error("error finalizing seal wrappers: {errors}")]
    Finalize { errors: WrapperErrors },

    /// A single-wrapper operation failed.
    #[error("seal wrapper '{name}' failed: {source}")]
    Wrapper { name: String, source: WrapperError },
}

impl AccessError {
    /// Whether the failure means a wrong key was presented.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        match self {
            Self::DecryptionFailed { errors } => errors.has_authentication_failure(),
            other => other.to_string().contains(AUTH_FAILED_MESSAGE),
        }
    }
}

/// Errors from seal-wrapped value encoding.
#[derive(Debug, thiserror::Error)]
pub enum WrappedValueError {
    /// Neither the envelope nor the single-blob form parsed.
    #[error(
        "error unmarshalling seal wrapped value: as multi-wrap value: {envelope}; as blob info: {blob}"
    )]
    Unmarshal { envelope: String, blob: String },

    /// Serialization failed.
    #[error("error marshalling seal wrapped value: {reason}")]
    Marshal { reason: String },

    /// The value has no slots.
    #[error("seal wrapped value has no slots")]
    Empty,

    /// An encrypted value was presented without any seal access.
    #[error("seal wrapped value is encrypted but no seal access is configured")]
    NoAccess,

    /// The seal access failed.
    #[error(transparent)]
    Access(#[from] AccessError),
}

/// Errors from barrier-key and recovery-key persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoredKeysError {
    /// The presented unseal key was wrong.
    #[error("invalid key: {reason}")]
    InvalidKey { reason: String },

    /// The unwrapped payload was not a valid key list.
    #[error("failed to decode stored keys: {reason}")]
    Decode { reason: String },

    /// The stored value could not be encoded, decoded, or unwrapped.
    #[error("stored keys error: {0}")]
    WrappedValue(#[from] WrappedValueError),

    /// The seal access failed.
    #[error("stored keys access error: {0}")]
    Access(#[from] AccessError),
}

/// Errors from the encryption barrier.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    /// The vault is sealed — no operations are possible until unseal.
    #[error("vault is sealed")]
    Sealed,

    /// A cryptographic operation within the barrier failed.
    #[error("barrier crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The underlying storage backend returned an error.
    #[error("barrier storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from seal/unseal operations.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    /// The vault has already been initialized.
    #[error("vault is already initialized")]
    AlreadyInitialized,

    /// The vault has not been initialized yet.
    #[error("vault is not initialized")]
    NotInitialized,

    /// The vault is already unsealed.
    #[error("vault is already unsealed")]
    AlreadyUnsealed,

    /// The vault is already sealed.
    #[error("vault is already sealed")]
    AlreadySealed,

    /// Invalid key share parameters.
    #[error("invalid seal config: {reason}")]
    InvalidConfig { reason: String },

    /// A submitted key share was invalid or corrupted.
    #[error("invalid unseal share: {reason}")]
    InvalidShare { reason: String },

    /// Shamir secret recovery failed (not enough shares or corrupted shares).
    #[error("share recovery failed: {reason}")]
    RecoveryFailed { reason: String },

    /// The combined key could not unwrap the stored barrier keys.
    #[error("invalid unseal key: {reason}")]
    InvalidKey { reason: String },

    /// The operation needs a Shamir seal but an auto seal is configured, or
    /// the reverse.
    #[error("operation not supported by seal type '{seal_type}'")]
    WrongSealType { seal_type: String },

    /// Leaving a Shamir seal needs the Shamir key to rewrap the stored
    /// barrier keys, so it is only possible while the vault is unsealed.
    #[error(
        "cannot migrate from seal type '{from}' to '{to}' while sealed: unseal with the current seal first, then reconfigure"
    )]
    MigrationRequiresUnseal { from: String, to: String },

    /// A cryptographic operation failed during seal/unseal.
    #[error("seal crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The seal access failed.
    #[error("seal access error: {0}")]
    Access(#[from] AccessError),

    /// Stored key persistence failed.
    #[error("seal stored keys error: {0}")]
    StoredKeys(#[from] StoredKeysError),

    /// A seal-wrapped value could not be handled.
    #[error("seal wrapped value error: {0}")]
    WrappedValue(#[from] WrappedValueError),

    /// The seal configuration change was rejected.
    #[error("seal generation error: {0}")]
    Generation(#[from] GenerationError),

    /// The encryption barrier returned an error.
    #[error("seal barrier error: {0}")]
    Barrier(#[from] BarrierError),

    /// The underlying storage backend returned an error.
    #[error("seal storage error: {0}")]
    Storage(#[from] StorageError),
}
