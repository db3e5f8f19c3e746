//! Controllable wrapper stub for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::crypto::{self, EncryptionKey};
use crate::error::{OLD_KEY_MESSAGE, WrapperError};
use crate::seal_wrapper::SealWrapper;
use crate::wrapping::{BlobInfo, KeyInfo, WrapOptions, Wrapper};

/// AES-GCM wrapper with switchable failures and a mutable key ID.
pub(crate) struct TestWrapper {
    key: EncryptionKey,
    key_id: Mutex<String>,
    fail_encrypt: AtomicBool,
    fail_decrypt: AtomicBool,
    fail_init: AtomicBool,
    old_key: AtomicBool,
    hang: AtomicBool,
    decrypt_calls: AtomicUsize,
    finalized: AtomicBool,
}

impl TestWrapper {
    pub(crate) fn new(key_id: &str) -> Arc<Self> {
        Arc::new(Self {
            key: EncryptionKey::generate(),
            key_id: Mutex::new(key_id.to_owned()),
            fail_encrypt: AtomicBool::new(false),
            fail_decrypt: AtomicBool::new(false),
            fail_init: AtomicBool::new(false),
            old_key: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            decrypt_calls: AtomicUsize::new(0),
            finalized: AtomicBool::new(false),
        })
    }

    pub(crate) fn set_key_id(&self, key_id: &str) {
        *self.key_id.lock().unwrap_or_else(PoisonError::into_inner) = key_id.to_owned();
    }

    pub(crate) fn set_fail_encrypt(&self, fail: bool) {
        self.fail_encrypt.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_decrypt(&self, fail: bool) {
        self.fail_decrypt.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Report successful decrypts the way legacy plugins report an old key.
    pub(crate) fn set_old_key(&self, old: bool) {
        self.old_key.store(old, Ordering::SeqCst);
    }

    /// Make encrypt and decrypt never return, like an unreachable KMS.
    pub(crate) fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub(crate) fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    async fn stall_if_hung(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    fn current_key_id(&self) -> String {
        self.key_id.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait::async_trait]
impl Wrapper for TestWrapper {
    fn wrapper_type(&self) -> &str {
        "test"
    }

    async fn key_id(&self) -> Result<String, WrapperError> {
        Ok(self.current_key_id())
    }

    async fn encrypt(
        &self,
        plaintext: &[u8],
        opts: &WrapOptions,
    ) -> Result<BlobInfo, WrapperError> {
        self.stall_if_hung().await;
        if self.fail_encrypt.load(Ordering::SeqCst) {
            return Err(WrapperError::Backend {
                message: "injected encrypt failure".to_owned(),
                plaintext: None,
            });
        }
        let (iv, ciphertext) = crypto::seal(&self.key, plaintext, &opts.aad)?;
        Ok(BlobInfo {
            wrapped: true,
            ciphertext,
            iv,
            hmac: Vec::new(),
            key_info: Some(KeyInfo::new(self.current_key_id())),
        })
    }

    async fn decrypt(&self, blob: &BlobInfo, opts: &WrapOptions) -> Result<Vec<u8>, WrapperError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.stall_if_hung().await;
        if self.fail_decrypt.load(Ordering::SeqCst) {
            return Err(WrapperError::Backend {
                message: "injected decrypt failure".to_owned(),
                plaintext: None,
            });
        }
        let plaintext = crypto::open(&self.key, &blob.iv, &blob.ciphertext, &opts.aad)?;
        if self.old_key.load(Ordering::SeqCst) {
            return Err(WrapperError::Backend {
                message: OLD_KEY_MESSAGE.to_owned(),
                plaintext: Some(plaintext.into()),
            });
        }
        Ok(plaintext)
    }

    async fn init(&self) -> Result<(), WrapperError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(WrapperError::Backend {
                message: "injected init failure".to_owned(),
                plaintext: None,
            });
        }
        Ok(())
    }

    async fn finalize(&self) -> Result<(), WrapperError> {
        self.finalized.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// An enabled [`SealWrapper`] around `wrapper`.
pub(crate) fn seal_wrapper(wrapper: &Arc<TestWrapper>, name: &str, priority: i32) -> SealWrapper {
    SealWrapper::new(Arc::clone(wrapper) as Arc<dyn Wrapper>, name, priority, "test", false)
}
