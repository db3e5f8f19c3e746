//! Wrapper capability and wire types.
//!
//! A [`Wrapper`] is one pluggable encryption backend: the Shamir-derived
//! AES-GCM wrapper, a static AEAD key, or an external KMS. It turns plaintext
//! into a [`BlobInfo`] and back. Wrappers that hold a Shamir-combined key
//! also expose the [`ShamirKeyed`] extension through [`Wrapper::as_shamir`].
//!
//! `BlobInfo` is persisted as JSON with byte fields encoded as standard
//! base64. Unknown fields are rejected so that a single blob can never be
//! mistaken for a multi-wrap envelope and vice versa.

use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{self, EncryptionKey};
use crate::error::WrapperError;

/// Wrapper type tag for Shamir seals.
pub const SHAMIR_SEAL_TYPE: &str = "shamir";

/// Wrapper type tag for static-key AES-GCM seals.
pub const AEAD_SEAL_TYPE: &str = "aead";

/// Identifies the key that produced a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyInfo {
    /// Key identifier as reported by the wrapper's `key_id`.
    pub key_id: String,
    /// Identifier of the HMAC key, for wrappers that also MAC.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hmac_key_id: String,
}

impl KeyInfo {
    /// Key info carrying only a key ID.
    #[must_use]
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            hmac_key_id: String::new(),
        }
    }
}

/// The output of one wrapper's encryption.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlobInfo {
    /// `true` when `ciphertext` really is ciphertext, `false` for plaintext
    /// passthrough.
    pub wrapped: bool,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(default, with = "b64", skip_serializing_if = "Vec::is_empty")]
    pub iv: Vec<u8>,
    #[serde(default, with = "b64", skip_serializing_if = "Vec::is_empty")]
    pub hmac: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_info: Option<KeyInfo>,
}

impl BlobInfo {
    /// A passthrough blob holding `plaintext` unencrypted.
    #[must_use]
    pub fn plaintext(plaintext: &[u8]) -> Self {
        Self {
            wrapped: false,
            ciphertext: plaintext.to_vec(),
            ..Self::default()
        }
    }

    /// Key ID recorded in the blob, or the empty string.
    #[must_use]
    pub fn key_id(&self) -> &str {
        self.key_info.as_ref().map_or("", |k| k.key_id.as_str())
    }
}

impl fmt::Debug for BlobInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Passthrough blobs hold plaintext, so contents are never printed.
        f.debug_struct("BlobInfo")
            .field("wrapped", &self.wrapped)
            .field("ciphertext_len", &self.ciphertext.len())
            .field("iv_len", &self.iv.len())
            .field("key_info", &self.key_info)
            .finish_non_exhaustive()
    }
}

/// Per-call options passed to a wrapper.
#[derive(Debug, Clone, Default)]
pub struct WrapOptions {
    /// Additional authenticated data bound to the ciphertext.
    pub aad: Vec<u8>,
    /// Upper bound on each individual wrapper call. Overrides the access's
    /// own call timeout when set.
    pub timeout: Option<Duration>,
}

impl WrapOptions {
    /// Options carrying the given AAD.
    #[must_use]
    pub fn with_aad(aad: impl Into<Vec<u8>>) -> Self {
        Self {
            aad: aad.into(),
            ..Self::default()
        }
    }

    /// Bound every wrapper call made with these options by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Decrypted bytes that are zeroized on drop and redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Plaintext(Zeroizing<Vec<u8>>);

impl Plaintext {
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> Zeroizing<Vec<u8>> {
        self.0
    }
}

impl From<Vec<u8>> for Plaintext {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }
}

impl fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Plaintext([REDACTED; {}])", self.0.len())
    }
}

/// One encryption backend used by a seal.
///
/// Every call may block on network I/O. Implementations must not hold locks
/// across awaits that callers could contend on. Dropping the returned future
/// cancels the call.
#[async_trait::async_trait]
pub trait Wrapper: Send + Sync + 'static {
    /// Type tag, e.g. `"shamir"`, `"aead"`, `"awskms"`.
    fn wrapper_type(&self) -> &str;

    /// Identifier of the key currently used for encryption.
    ///
    /// Must be cheap and free of side effects; it is called for every wrapper
    /// on every decrypt and up-to-date check.
    async fn key_id(&self) -> Result<String, WrapperError>;

    /// Encrypt `plaintext`, returning the blob to persist.
    async fn encrypt(&self, plaintext: &[u8], opts: &WrapOptions)
    -> Result<BlobInfo, WrapperError>;

    /// Decrypt a blob produced by [`encrypt`](Wrapper::encrypt).
    ///
    /// A wrapper that only succeeds with a retired key returns
    /// [`WrapperError::OldKey`] carrying the plaintext.
    async fn decrypt(&self, blob: &BlobInfo, opts: &WrapOptions) -> Result<Vec<u8>, WrapperError>;

    /// Prepare the wrapper for use. The default does nothing.
    async fn init(&self) -> Result<(), WrapperError> {
        Ok(())
    }

    /// Release resources. The default does nothing.
    async fn finalize(&self) -> Result<(), WrapperError> {
        Ok(())
    }

    /// The Shamir key extension, for wrappers that carry one.
    fn as_shamir(&self) -> Option<&dyn ShamirKeyed> {
        None
    }
}

/// Extension for wrappers whose key is combined from Shamir shares.
pub trait ShamirKeyed: Send + Sync {
    /// Install the combined key.
    ///
    /// # Errors
    ///
    /// Returns [`WrapperError::Crypto`] if the key has the wrong length.
    fn set_key_bytes(&self, key: &[u8]) -> Result<(), WrapperError>;

    /// Install `key` as a replacement for the current key. Values wrapped
    /// under the replaced key still decrypt, reported as
    /// [`WrapperError::OldKey`].
    ///
    /// # Errors
    ///
    /// Returns [`WrapperError::Crypto`] if the key has the wrong length.
    fn rotate_key_bytes(&self, key: &[u8]) -> Result<(), WrapperError>;

    /// Current key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WrapperError::KeyNotSet`] before a key has been installed.
    fn key_bytes(&self) -> Result<Zeroizing<Vec<u8>>, WrapperError>;
}

/// A static-key AES-256-GCM wrapper.
///
/// The building block for the Shamir wrapper, and usable on its own as an
/// auto-unseal wrapper whose key comes from configuration.
pub struct AeadWrapper {
    key_id: String,
    key: RwLock<Option<EncryptionKey>>,
}

impl AeadWrapper {
    /// A wrapper with no key yet.
    #[must_use]
    pub fn empty(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key: RwLock::new(None),
        }
    }

    /// A wrapper using `key`.
    #[must_use]
    pub fn new(key_id: impl Into<String>, key: EncryptionKey) -> Self {
        Self {
            key_id: key_id.into(),
            key: RwLock::new(Some(key)),
        }
    }

    /// A wrapper with a freshly generated key.
    #[must_use]
    pub fn generate(key_id: impl Into<String>) -> Self {
        Self::new(key_id, EncryptionKey::generate())
    }

    /// Replace the key.
    pub fn set_key(&self, key: EncryptionKey) {
        *self.key.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(key);
    }

    /// Clone of the current key.
    ///
    /// # Errors
    ///
    /// Returns [`WrapperError::KeyNotSet`] if no key is installed.
    pub fn key(&self) -> Result<EncryptionKey, WrapperError> {
        self.key
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or(WrapperError::KeyNotSet)
    }

    /// The configured key ID.
    #[must_use]
    pub fn configured_key_id(&self) -> &str {
        &self.key_id
    }

    /// Encrypt with an explicit key, tagging the blob with this wrapper's key ID.
    pub(crate) fn encrypt_with(
        &self,
        key: &EncryptionKey,
        plaintext: &[u8],
        opts: &WrapOptions,
    ) -> Result<BlobInfo, WrapperError> {
        let (iv, ciphertext) = crypto::seal(key, plaintext, &opts.aad)?;
        Ok(BlobInfo {
            wrapped: true,
            ciphertext,
            iv,
            hmac: Vec::new(),
            key_info: Some(KeyInfo::new(self.key_id.clone())),
        })
    }

    /// Decrypt with an explicit key. The `wrapped` flag is not consulted:
    /// stored barrier keys persist ciphertext with `wrapped = false`.
    pub(crate) fn decrypt_with(
        key: &EncryptionKey,
        blob: &BlobInfo,
        opts: &WrapOptions,
    ) -> Result<Vec<u8>, WrapperError> {
        if blob.iv.is_empty() {
            return Err(WrapperError::InvalidBlob {
                reason: "missing iv".to_owned(),
            });
        }
        Ok(crypto::open(key, &blob.iv, &blob.ciphertext, &opts.aad)?)
    }
}

impl fmt::Debug for AeadWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadWrapper")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Wrapper for AeadWrapper {
    fn wrapper_type(&self) -> &str {
        AEAD_SEAL_TYPE
    }

    async fn key_id(&self) -> Result<String, WrapperError> {
        Ok(self.key_id.clone())
    }

    async fn encrypt(
        &self,
        plaintext: &[u8],
        opts: &WrapOptions,
    ) -> Result<BlobInfo, WrapperError> {
        let key = self.key()?;
        self.encrypt_with(&key, plaintext, opts)
    }

    async fn decrypt(&self, blob: &BlobInfo, opts: &WrapOptions) -> Result<Vec<u8>, WrapperError> {
        let key = self.key()?;
        Self::decrypt_with(&key, blob, opts)
    }
}

/// Serde adapter encoding byte vectors as standard base64 strings.
mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
