//! Persisted form of seal-wrapped values.
//!
//! Two encodings are read and written:
//!
//! - a bare [`BlobInfo`], used whenever a value has exactly one slot. This
//!   keeps single-seal deployments byte-compatible with entries written
//!   before multi-seal support existed;
//! - a [`MultiWrapValue`] envelope (`generation` + `slots`) for everything
//!   else.
//!
//! A bare blob read back carries no generation and becomes a *transitory*
//! value (generation 0), which up-to-date checks never compare against the
//! live generation.
//!
//! Storage entries may also end in a one-byte `'s'` canary marking them as
//! seal-wrapped; see [`unmarshal_seal_wrapped_value_with_canary`].

use serde::{Deserialize, Serialize};
use tracing::warn;
use zeroize::Zeroizing;

use crate::access::Access;
use crate::error::WrappedValueError;
use crate::wrapping::{BlobInfo, WrapOptions};

/// Trailing byte marking a storage value as seal-wrapped.
pub const SEAL_WRAP_CANARY: u8 = b's';

/// Multi-slot envelope: one [`BlobInfo`] per wrapper that encrypted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiWrapValue {
    /// Seal generation the value was written under; 0 when unknown.
    pub generation: u64,
    pub slots: Vec<BlobInfo>,
}

impl MultiWrapValue {
    /// Whether any slot holds real ciphertext.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.slots.iter().any(|slot| slot.wrapped)
    }
}

/// A [`MultiWrapValue`] as read from or written to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealWrappedValue {
    value: MultiWrapValue,
    transitory: bool,
}

impl SealWrappedValue {
    /// Wrap a versioned envelope.
    #[must_use]
    pub fn new(value: MultiWrapValue) -> Self {
        Self {
            value,
            transitory: false,
        }
    }

    /// A transitory value built from a legacy single blob.
    #[must_use]
    pub fn from_legacy_blob(blob: BlobInfo) -> Self {
        Self {
            value: MultiWrapValue {
                generation: 0,
                slots: vec![blob],
            },
            transitory: true,
        }
    }

    /// A plaintext value stamped with `generation`.
    #[must_use]
    pub fn plaintext(generation: u64, plaintext: &[u8]) -> Self {
        Self::new(MultiWrapValue {
            generation,
            slots: vec![BlobInfo::plaintext(plaintext)],
        })
    }

    #[must_use]
    pub fn value(&self) -> &MultiWrapValue {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> MultiWrapValue {
        self.value
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [BlobInfo] {
        &mut self.value.slots
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.value.generation
    }

    /// Whether this value was read from the legacy single-blob form.
    #[must_use]
    pub fn is_transitory(&self) -> bool {
        self.transitory
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.value.is_encrypted()
    }
}

/// Seal-wrap `plaintext`.
///
/// - With no `access`, the result is an unencrypted transitory value.
/// - With `encrypt == false`, the result is unencrypted but stamped with the
///   access's current generation.
/// - Otherwise the plaintext is encrypted by every enabled wrapper. Partial
///   failures are logged; only a total failure is an error.
///
/// # Errors
///
/// Returns [`WrappedValueError::Access`] if no wrapper produced a slot.
pub async fn seal_wrap_value(
    access: Option<&Access>,
    encrypt: bool,
    plaintext: &[u8],
) -> Result<SealWrappedValue, WrappedValueError> {
    let Some(access) = access else {
        return Ok(SealWrappedValue::from_legacy_blob(BlobInfo::plaintext(plaintext)));
    };
    if !encrypt {
        return Ok(SealWrappedValue::plaintext(access.generation(), plaintext));
    }

    let encrypted = access.encrypt(plaintext, &WrapOptions::default()).await?;
    if !encrypted.errors.is_empty() {
        warn!(
            errors = %encrypted.errors,
            slots = encrypted.value.slots.len(),
            "seal wrapped value with reduced slot set"
        );
    }
    Ok(SealWrappedValue::new(encrypted.value))
}

/// Recover the plaintext of `value`, returning it with its up-to-date flag.
///
/// Unencrypted values are returned as-is; they are up to date when no
/// access is configured or their generation matches.
///
/// # Errors
///
/// - [`WrappedValueError::Empty`] for a value with no slots.
/// - [`WrappedValueError::NoAccess`] for an encrypted value without access.
/// - [`WrappedValueError::Access`] if decryption fails.
pub async fn unwrap_value(
    access: Option<&Access>,
    value: &SealWrappedValue,
) -> Result<(Zeroizing<Vec<u8>>, bool), WrappedValueError> {
    let first = value.value().slots.first().ok_or(WrappedValueError::Empty)?;
    if !value.is_encrypted() {
        let up_to_date = access.is_none_or(|a| {
            value.is_transitory() || value.generation() == a.generation()
        });
        return Ok((Zeroizing::new(first.ciphertext.clone()), up_to_date));
    }
    let access = access.ok_or(WrappedValueError::NoAccess)?;
    let decrypted = access.decrypt(value.value(), &WrapOptions::default()).await?;
    Ok((decrypted.plaintext, decrypted.is_up_to_date))
}

/// Encode `value` for storage.
///
/// A single slot is written as a bare [`BlobInfo`]; several slots as the full
/// envelope.
///
/// # Errors
///
/// - [`WrappedValueError::Empty`] for a value with no slots.
/// - [`WrappedValueError::Marshal`] if serialization fails.
pub fn marshal_seal_wrapped_value(value: &SealWrappedValue) -> Result<Vec<u8>, WrappedValueError> {
    let to_marshal_err = |e: serde_json::Error| WrappedValueError::Marshal {
        reason: e.to_string(),
    };
    match value.value().slots.as_slice() {
        [] => Err(WrappedValueError::Empty),
        [single] => serde_json::to_vec(single).map_err(to_marshal_err),
        _ => serde_json::to_vec(value.value()).map_err(to_marshal_err),
    }
}

/// [`marshal_seal_wrapped_value`] followed by the `'s'` canary byte.
///
/// # Errors
///
/// As [`marshal_seal_wrapped_value`].
pub fn marshal_seal_wrapped_value_with_canary(
    value: &SealWrappedValue,
) -> Result<Vec<u8>, WrappedValueError> {
    let mut bytes = marshal_seal_wrapped_value(value)?;
    bytes.push(SEAL_WRAP_CANARY);
    Ok(bytes)
}

/// Decode bytes written by [`marshal_seal_wrapped_value`].
///
/// The envelope form is tried first, then the bare-blob form, which yields a
/// transitory value.
///
/// # Errors
///
/// Returns [`WrappedValueError::Unmarshal`] carrying both parse errors.
pub fn unmarshal_seal_wrapped_value(bytes: &[u8]) -> Result<SealWrappedValue, WrappedValueError> {
    let envelope_err = match serde_json::from_slice::<MultiWrapValue>(bytes) {
        Ok(value) => return Ok(SealWrappedValue::new(value)),
        Err(e) => e,
    };
    match serde_json::from_slice::<BlobInfo>(bytes) {
        Ok(blob) => Ok(SealWrappedValue::from_legacy_blob(blob)),
        Err(blob_err) => Err(WrappedValueError::Unmarshal {
            envelope: envelope_err.to_string(),
            blob: blob_err.to_string(),
        }),
    }
}

/// Decode a storage value that may end in the seal-wrap canary.
///
/// Returns `None` when the canary is absent or the remaining bytes do not
/// parse; the canary is a hint, not a guarantee.
#[must_use]
pub fn unmarshal_seal_wrapped_value_with_canary(bytes: &[u8]) -> Option<SealWrappedValue> {
    match bytes.split_last() {
        Some((&SEAL_WRAP_CANARY, payload)) => unmarshal_seal_wrapped_value(payload).ok(),
        _ => None,
    }
}
