//! Cryptographic primitives for `ZVault`.
//!
//! AES-256-GCM authenticated encryption with zeroize-on-drop key newtypes.
//! Two layouts are offered:
//!
//! - [`seal`]/[`open`] keep the nonce separate from the ciphertext, which is
//!   what wrappers need to fill a `BlobInfo` (`iv` + `ciphertext`).
//! - [`encrypt`]/[`decrypt`] produce `nonce (12 bytes) || ciphertext || tag`
//!   for the barrier, binding the storage path as additional authenticated
//!   data.
//!
//! Every encryption draws a fresh 96-bit nonce from `OsRng`.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Length of an AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-256-GCM (96 bits).
pub const NONCE_LEN: usize = 12;

/// Length of the GCM authentication tag.
const TAG_LEN: usize = 16;

/// A 256-bit encryption key that is zeroized on drop.
///
/// Used for the barrier key, the Shamir unseal key, the recovery key, and
/// static AEAD wrapper keys. The inner bytes never appear in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a key from a slice, checking its length.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] unless `bytes` is 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    ///
    /// The caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        // Keys are compared only in tests and key rotation checks.
        self.0.iter().zip(other.0.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

impl Eq for EncryptionKey {}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypt `plaintext` under a fresh nonce, returning `(nonce, ciphertext || tag)`.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn seal(
    key: &EncryptionKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = key
        .cipher()
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;
    Ok((nonce.to_vec(), ciphertext))
}

/// Reverse [`seal`].
///
/// # Errors
///
/// - [`CryptoError::InvalidNonceLength`] if `nonce` is not 12 bytes.
/// - [`CryptoError::CiphertextTooShort`] if `ciphertext` cannot hold a tag.
/// - [`CryptoError::Authentication`] if the tag does not verify.
pub fn open(
    key: &EncryptionKey,
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_LEN,
            actual: nonce.len(),
        });
    }
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: TAG_LEN,
            actual: ciphertext.len(),
        });
    }
    key.cipher()
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Authentication)
}

/// Encrypt into the combined `nonce || ciphertext || tag` layout.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let (nonce, ciphertext) = seal(key, plaintext, aad)?;
    let mut combined = Vec::with_capacity(NONCE_LEN.saturating_add(ciphertext.len()));
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

/// Decrypt the combined layout produced by [`encrypt`].
///
/// # Errors
///
/// - [`CryptoError::CiphertextTooShort`] if the input is shorter than 28 bytes.
/// - [`CryptoError::Authentication`] if the key, AAD, or data do not match.
pub fn decrypt(key: &EncryptionKey, combined: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let min = NONCE_LEN.saturating_add(TAG_LEN);
    if combined.len() < min {
        return Err(CryptoError::CiphertextTooShort {
            expected: min,
            actual: combined.len(),
        });
    }
    let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
    open(key, nonce, ciphertext, aad)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip_with_aad() {
        let key = EncryptionKey::generate();
        let (nonce, ct) = seal(&key, b"barrier keys", b"core/keyring").unwrap();
        assert_eq!(nonce.len(), NONCE_LEN);
        let pt = open(&key, &nonce, &ct, b"core/keyring").unwrap();
        assert_eq!(pt, b"barrier keys");
    }

    #[test]
    fn open_with_wrong_aad_fails_authentication() {
        let key = EncryptionKey::generate();
        let (nonce, ct) = seal(&key, b"data", b"path/a").unwrap();
        let err = open(&key, &nonce, &ct, b"path/b").unwrap_err();
        assert!(matches!(err, CryptoError::Authentication));
        assert!(err.to_string().contains("message authentication failed"));
    }

    #[test]
    fn open_with_wrong_key_fails_authentication() {
        let (nonce, ct) = seal(&EncryptionKey::generate(), b"data", b"").unwrap();
        let err = open(&EncryptionKey::generate(), &nonce, &ct, b"").unwrap_err();
        assert!(matches!(err, CryptoError::Authentication));
    }

    #[test]
    fn open_rejects_bad_nonce_length() {
        let key = EncryptionKey::generate();
        let err = open(&key, &[0u8; 4], &[0u8; 32], b"").unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidNonceLength {
                expected: 12,
                actual: 4
            }
        ));
    }

    #[test]
    fn combined_layout_roundtrip_and_too_short() {
        let key = EncryptionKey::generate();
        let ct = encrypt(&key, b"", b"k").unwrap();
        assert_eq!(ct.len(), NONCE_LEN + TAG_LEN);
        assert!(decrypt(&key, &ct, b"k").unwrap().is_empty());

        let err = decrypt(&key, &[0u8; 10], b"k").unwrap_err();
        assert!(matches!(
            err,
            CryptoError::CiphertextTooShort {
                expected: 28,
                actual: 10
            }
        ));
    }

    #[test]
    fn two_encryptions_produce_different_ciphertext() {
        let key = EncryptionKey::generate();
        assert_ne!(
            encrypt(&key, b"same", b"").unwrap(),
            encrypt(&key, b"same", b"").unwrap()
        );
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(EncryptionKey::from_slice(&[7u8; 32]).is_ok());
        let err = EncryptionKey::from_slice(&[7u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn encryption_key_debug_redacts_bytes() {
        let debug = format!("{:?}", EncryptionKey::from_bytes([0xAB; 32]));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("171"));
    }
}
