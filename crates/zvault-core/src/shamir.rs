//! Shamir seal wrapper and key-share helpers.
//!
//! The Shamir wrapper is an AES-256-GCM wrapper whose key is never
//! configured: it is combined from operator shares at unseal time and
//! installed through [`ShamirKeyed::set_key_bytes`]. A rekey installs the
//! next key through [`ShamirKeyed::rotate_key_bytes`], which retains the
//! previous key so that values wrapped under it still decrypt, reported as
//! [`WrapperError::OldKey`] to trigger a rewrap.
//!
//! Share splitting and combining delegate to the `sharks` crate.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use sharks::{Share, Sharks};
use zeroize::Zeroizing;

use crate::crypto::EncryptionKey;
use crate::error::{SealError, WrapperError};
use crate::wrapping::{AeadWrapper, BlobInfo, SHAMIR_SEAL_TYPE, ShamirKeyed, WrapOptions, Wrapper};

/// Wrapper whose AES-GCM key is reconstructed from Shamir shares.
pub struct ShamirWrapper {
    inner: AeadWrapper,
    previous: RwLock<Option<EncryptionKey>>,
}

impl ShamirWrapper {
    /// A Shamir wrapper with no key installed. Shamir blobs carry an empty
    /// key ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: AeadWrapper::empty(""),
            previous: RwLock::new(None),
        }
    }

    fn previous_key(&self) -> Option<EncryptionKey> {
        self.previous
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for ShamirWrapper {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShamirWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShamirWrapper")
            .field("key_set", &self.inner.key().is_ok())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Wrapper for ShamirWrapper {
    fn wrapper_type(&self) -> &str {
        SHAMIR_SEAL_TYPE
    }

    async fn key_id(&self) -> Result<String, WrapperError> {
        Ok(self.inner.configured_key_id().to_owned())
    }

    async fn encrypt(
        &self,
        plaintext: &[u8],
        opts: &WrapOptions,
    ) -> Result<BlobInfo, WrapperError> {
        let key = self.inner.key()?;
        self.inner.encrypt_with(&key, plaintext, opts)
    }

    async fn decrypt(&self, blob: &BlobInfo, opts: &WrapOptions) -> Result<Vec<u8>, WrapperError> {
        let key = self.inner.key()?;
        match AeadWrapper::decrypt_with(&key, blob, opts) {
            Ok(pt) => Ok(pt),
            Err(err) if err.is_authentication_failure() => {
                let Some(previous) = self.previous_key() else {
                    return Err(err);
                };
                match AeadWrapper::decrypt_with(&previous, blob, opts) {
                    Ok(pt) => Err(WrapperError::OldKey {
                        plaintext: pt.into(),
                    }),
                    Err(_) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn as_shamir(&self) -> Option<&dyn ShamirKeyed> {
        Some(self)
    }
}

impl ShamirKeyed for ShamirWrapper {
    fn set_key_bytes(&self, key: &[u8]) -> Result<(), WrapperError> {
        self.inner.set_key(EncryptionKey::from_slice(key)?);
        Ok(())
    }

    /// Keeps the current key (if any, and different) as the previous key.
    fn rotate_key_bytes(&self, key: &[u8]) -> Result<(), WrapperError> {
        let next = EncryptionKey::from_slice(key)?;
        if let Ok(current) = self.inner.key() {
            if current != next {
                *self.previous.write().unwrap_or_else(PoisonError::into_inner) = Some(current);
            }
        }
        self.inner.set_key(next);
        Ok(())
    }

    fn key_bytes(&self) -> Result<Zeroizing<Vec<u8>>, WrapperError> {
        let key = self.inner.key()?;
        Ok(Zeroizing::new(key.as_bytes().to_vec()))
    }
}

/// Validate share-count and threshold parameters.
///
/// # Errors
///
/// Returns [`SealError::InvalidConfig`] when `shares` is outside `1..=10`,
/// `threshold` is below 2 (unless a single share is requested), or
/// `threshold` exceeds `shares`.
pub fn validate_share_config(shares: u8, threshold: u8) -> Result<(), SealError> {
    if !(1..=10).contains(&shares) {
        return Err(SealError::InvalidConfig {
            reason: format!("share count must be 1-10, got {shares}"),
        });
    }
    if threshold > shares {
        return Err(SealError::InvalidConfig {
            reason: format!("threshold ({threshold}) cannot exceed share count ({shares})"),
        });
    }
    if shares == 1 && threshold == 1 {
        return Ok(());
    }
    if threshold < 2 {
        return Err(SealError::InvalidConfig {
            reason: format!("threshold must be at least 2, got {threshold}"),
        });
    }
    Ok(())
}

/// Split `secret` into `shares` shares, any `threshold` of which recombine it.
///
/// # Errors
///
/// Returns [`SealError::InvalidConfig`] if the parameters are invalid.
pub fn split_key(secret: &[u8], shares: u8, threshold: u8) -> Result<Vec<Vec<u8>>, SealError> {
    validate_share_config(shares, threshold)?;
    if shares == 1 {
        return Ok(vec![secret.to_vec()]);
    }
    let dealer = Sharks(threshold).dealer(secret);
    Ok(dealer
        .take(usize::from(shares))
        .map(|share| Vec::from(&share))
        .collect())
}

/// Recombine shares produced by [`split_key`].
///
/// # Errors
///
/// - [`SealError::InvalidShare`] if a share cannot be parsed.
/// - [`SealError::RecoveryFailed`] if too few shares are supplied.
pub fn combine_shares(shares: &[Vec<u8>], threshold: u8) -> Result<Zeroizing<Vec<u8>>, SealError> {
    if threshold <= 1 {
        return shares
            .first()
            .map(|s| Zeroizing::new(s.clone()))
            .ok_or_else(|| SealError::RecoveryFailed {
                reason: "no shares supplied".to_owned(),
            });
    }
    let parsed = shares
        .iter()
        .map(|bytes| {
            Share::try_from(bytes.as_slice()).map_err(|e| SealError::InvalidShare {
                reason: format!("share deserialization failed: {e}"),
            })
        })
        .collect::<Result<Vec<Share>, SealError>>()?;

    Sharks(threshold)
        .recover(&parsed)
        .map(Zeroizing::new)
        .map_err(|e| SealError::RecoveryFailed {
            reason: e.to_string(),
        })
}
