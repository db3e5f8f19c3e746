//! Persistence of the stored barrier keys and the recovery key.
//!
//! Both are seal-wrapped with the current [`Access`] and written at fixed
//! storage paths. The barrier keys are a JSON list of base64 strings; the
//! recovery key is stored as-is.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use zeroize::Zeroizing;
use zvault_storage::Entry;

use crate::access::Access;
use crate::error::StoredKeysError;
use crate::wrapped_value::{marshal_seal_wrapped_value, seal_wrap_value, unmarshal_seal_wrapped_value};
use crate::wrapping::WrapOptions;

/// Storage path of the seal-wrapped barrier keys.
pub const STORED_BARRIER_KEYS_PATH: &str = "core/hsm/barrier-unseal-keys";

/// Storage path of the seal-wrapped recovery key.
pub const RECOVERY_KEY_PATH: &str = "core/recovery-key";

/// Unwrapped keys together with whether their stored form is current.
pub struct UnwrappedKeys {
    pub keys: Vec<Zeroizing<Vec<u8>>>,
    pub is_up_to_date: bool,
}

impl std::fmt::Debug for UnwrappedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnwrappedKeys")
            .field("keys", &self.keys.len())
            .field("is_up_to_date", &self.is_up_to_date)
            .finish()
    }
}

/// Seal-wrap `keys` into an entry at [`STORED_BARRIER_KEYS_PATH`].
///
/// Every slot is written with `wrapped = false`; entries have always been
/// stored that way and older readers depend on it.
///
/// # Errors
///
/// - [`StoredKeysError::Decode`] if the key list cannot be encoded.
/// - [`StoredKeysError::WrappedValue`] if no wrapper could encrypt.
pub async fn seal_wrap_stored_barrier_keys(
    access: &Access,
    keys: &[Zeroizing<Vec<u8>>],
) -> Result<Entry, StoredKeysError> {
    let encoded: Vec<String> = keys.iter().map(|k| BASE64.encode(k.as_slice())).collect();
    let json = Zeroizing::new(serde_json::to_vec(&encoded).map_err(|e| {
        StoredKeysError::Decode {
            reason: format!("failed to encode barrier keys: {e}"),
        }
    })?);

    let mut value = seal_wrap_value(Some(access), true, &json).await?;
    for slot in value.slots_mut() {
        slot.wrapped = false;
    }
    let bytes = marshal_seal_wrapped_value(&value)?;
    Ok(Entry::new(STORED_BARRIER_KEYS_PATH, bytes))
}

/// Reverse [`seal_wrap_stored_barrier_keys`].
///
/// # Errors
///
/// - [`StoredKeysError::InvalidKey`] if the wrapper rejected the ciphertext
///   as unauthentic (wrong unseal key).
/// - [`StoredKeysError::Decode`] if the payload is not a key list.
/// - [`StoredKeysError::WrappedValue`] if the entry does not parse.
/// - [`StoredKeysError::Access`] for any other decryption failure.
pub async fn unseal_wrap_stored_barrier_keys(
    access: &Access,
    stored: &[u8],
) -> Result<UnwrappedKeys, StoredKeysError> {
    let (json, is_up_to_date) = unwrap_entry(access, stored).await?;
    let encoded: Vec<String> =
        serde_json::from_slice(&json).map_err(|e| StoredKeysError::Decode {
            reason: format!("failed to decode barrier keys: {e}"),
        })?;
    let keys = encoded
        .iter()
        .map(|k| {
            BASE64
                .decode(k)
                .map(Zeroizing::new)
                .map_err(|e| StoredKeysError::Decode {
                    reason: format!("failed to decode barrier key: {e}"),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(UnwrappedKeys {
        keys,
        is_up_to_date,
    })
}

/// Seal-wrap the recovery key into an entry at [`RECOVERY_KEY_PATH`].
///
/// # Errors
///
/// Returns [`StoredKeysError::WrappedValue`] if no wrapper could encrypt.
pub async fn seal_wrap_recovery_key(
    access: &Access,
    key: &[u8],
) -> Result<Entry, StoredKeysError> {
    let value = seal_wrap_value(Some(access), true, key).await?;
    let bytes = marshal_seal_wrapped_value(&value)?;
    Ok(Entry::new(RECOVERY_KEY_PATH, bytes))
}

/// Reverse [`seal_wrap_recovery_key`], returning the key and whether its
/// stored form is current.
///
/// # Errors
///
/// As [`unseal_wrap_stored_barrier_keys`], minus the list decoding.
pub async fn unseal_wrap_recovery_key(
    access: &Access,
    stored: &[u8],
) -> Result<(Zeroizing<Vec<u8>>, bool), StoredKeysError> {
    unwrap_entry(access, stored).await
}

/// Stored keys are decrypted regardless of the slots' `wrapped` flag.
async fn unwrap_entry(
    access: &Access,
    stored: &[u8],
) -> Result<(Zeroizing<Vec<u8>>, bool), StoredKeysError> {
    let value = unmarshal_seal_wrapped_value(stored)?;
    match access.decrypt(value.value(), &WrapOptions::default()).await {
        Ok(decrypted) => Ok((decrypted.plaintext, decrypted.is_up_to_date)),
        Err(err) if err.is_authentication_failure() => Err(StoredKeysError::InvalidKey {
            reason: err.to_string(),
        }),
        Err(err) => Err(StoredKeysError::Access(err)),
    }
}

impl StoredKeysError {
    /// Whether the failure was caused by a wrong key rather than corrupt
    /// storage.
    #[must_use]
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, Self::InvalidKey { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::generation::{SealDescriptor, SealGenerationInfo};
    use crate::seal_wrapper::SealWrapper;
    use crate::shamir::ShamirWrapper;
    use crate::testing::{TestWrapper, seal_wrapper};
    use crate::error::WrappedValueError;
    use crate::wrapped_value::SEAL_WRAP_CANARY;
    use crate::wrapping::{BlobInfo, Wrapper};

    fn keys() -> Vec<Zeroizing<Vec<u8>>> {
        vec![Zeroizing::new(vec![1u8; 32]), Zeroizing::new(vec![2u8; 32])]
    }

    fn access(generation: u64, a: &Arc<TestWrapper>, b: &Arc<TestWrapper>) -> Access {
        let info = SealGenerationInfo::new(
            generation,
            vec![
                SealDescriptor::new("test", "a", 1),
                SealDescriptor::new("test", "b", 2),
            ],
        );
        Access::new(info, vec![seal_wrapper(a, "a", 1), seal_wrapper(b, "b", 2)]).unwrap()
    }

    #[tokio::test]
    async fn barrier_keys_roundtrip_with_unwrapped_flag() {
        let (a, b) = (TestWrapper::new("ka"), TestWrapper::new("kb"));
        let access = access(1, &a, &b);

        let entry = seal_wrap_stored_barrier_keys(&access, &keys()).await.unwrap();
        assert_eq!(entry.key, STORED_BARRIER_KEYS_PATH);
        assert_ne!(entry.value.last(), Some(&SEAL_WRAP_CANARY));

        let stored = unmarshal_seal_wrapped_value(&entry.value).unwrap();
        assert_eq!(stored.value().slots.len(), 2);
        assert!(stored.value().slots.iter().all(|s| !s.wrapped));

        let unwrapped = unseal_wrap_stored_barrier_keys(&access, &entry.value).await.unwrap();
        assert_eq!(unwrapped.keys, keys());
        assert!(unwrapped.is_up_to_date);
    }

    #[tokio::test]
    async fn stale_generation_is_reported() {
        let (a, b) = (TestWrapper::new("ka"), TestWrapper::new("kb"));
        let entry = seal_wrap_stored_barrier_keys(&access(1, &a, &b), &keys())
            .await
            .unwrap();

        let newer = access(2, &a, &b);
        let unwrapped = unseal_wrap_stored_barrier_keys(&newer, &entry.value).await.unwrap();
        assert_eq!(unwrapped.keys, keys());
        assert!(!unwrapped.is_up_to_date);
    }

    #[tokio::test]
    async fn wrong_shamir_key_is_invalid_key() {
        let shamir = Arc::new(ShamirWrapper::new());
        let access = Access::from_wrapper(1, "shamir", Arc::clone(&shamir) as Arc<dyn Wrapper>).unwrap();
        access.set_shamir_seal_key(&[7u8; 32]).unwrap();
        let entry = seal_wrap_stored_barrier_keys(&access, &keys()).await.unwrap();

        access.set_shamir_seal_key(&[8u8; 32]).unwrap();
        let err = unseal_wrap_stored_barrier_keys(&access, &entry.value)
            .await
            .unwrap_err();
        assert!(err.is_invalid_key(), "{err}");
        assert!(err.to_string().contains("message authentication failed"));
    }

    #[tokio::test]
    async fn corrupt_entry_is_not_invalid_key() {
        let (a, b) = (TestWrapper::new("ka"), TestWrapper::new("kb"));
        let err = unseal_wrap_stored_barrier_keys(&access(1, &a, &b), b"not json")
            .await
            .unwrap_err();
        assert!(!err.is_invalid_key());
        assert!(matches!(err, StoredKeysError::WrappedValue(WrappedValueError::Unmarshal { .. })));
    }

    #[tokio::test]
    async fn legacy_single_blob_entry_is_readable() {
        let a = TestWrapper::new("ka");
        let access = Access::new(
            SealGenerationInfo::new(3, vec![SealDescriptor::new("test", "a", 1)]),
            vec![seal_wrapper(&a, "a", 1)],
        )
        .unwrap();
        let encrypted = access
            .encrypt(b"[\"AQID\"]", &WrapOptions::default())
            .await
            .unwrap();
        let mut blob: BlobInfo = encrypted.value.slots[0].clone();
        blob.wrapped = false;
        let legacy = serde_json::to_vec(&blob).unwrap();

        let unwrapped = unseal_wrap_stored_barrier_keys(&access, &legacy).await.unwrap();
        assert_eq!(unwrapped.keys, vec![Zeroizing::new(vec![1u8, 2, 3])]);
        // Transitory values skip the generation check.
        assert!(unwrapped.is_up_to_date);
    }

    #[tokio::test]
    async fn recovery_key_roundtrip() {
        let (a, b) = (TestWrapper::new("ka"), TestWrapper::new("kb"));
        let access = access(1, &a, &b);

        let entry = seal_wrap_recovery_key(&access, b"recovery-key-bytes").await.unwrap();
        assert_eq!(entry.key, RECOVERY_KEY_PATH);
        let stored = unmarshal_seal_wrapped_value(&entry.value).unwrap();
        assert!(stored.value().slots.iter().all(|s| s.wrapped));

        let (key, up_to_date) = unseal_wrap_recovery_key(&access, &entry.value).await.unwrap();
        assert_eq!(key.as_slice(), b"recovery-key-bytes");
        assert!(up_to_date);
    }

    #[tokio::test]
    async fn disabled_wrapper_still_unwraps() {
        let (a, b) = (TestWrapper::new("ka"), TestWrapper::new("kb"));
        let entry = seal_wrap_recovery_key(&access(1, &a, &b), b"rk").await.unwrap();

        let disabled_a = SealWrapper::new(Arc::clone(&a) as Arc<dyn Wrapper>, "a", 1, "test", true);
        let info = SealGenerationInfo::new(
            2,
            vec![
                SealDescriptor::new("test", "a", 1).disabled(),
                SealDescriptor::new("test", "b", 2),
            ],
        );
        let migrated = Access::new(info, vec![disabled_a, seal_wrapper(&b, "b", 2)]).unwrap();
        b.set_fail_decrypt(true);

        let (key, up_to_date) = unseal_wrap_recovery_key(&migrated, &entry.value).await.unwrap();
        assert_eq!(key.as_slice(), b"rk");
        assert!(!up_to_date);
    }
}
