//! A single named, prioritized wrapper inside a seal.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::WrapperError;
use crate::generation::SealDescriptor;
use crate::wrapping::{BlobInfo, WrapOptions, Wrapper};

/// Health fields of one wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WrapperHealth {
    pub healthy: bool,
    /// When the last health check ran, if ever.
    pub last_health_check: Option<DateTime<Utc>>,
    /// When the wrapper was last known to work.
    pub last_seen_healthy: Option<DateTime<Utc>>,
}

/// One encryption backend with its name, priority, and enablement.
///
/// Name, priority, type, and `disabled` are fixed for the life of the value;
/// a reconfiguration builds a new [`Access`](crate::access::Access). Only the
/// health fields change, behind a lock owned by this wrapper alone so that
/// probing one wrapper never blocks traffic through another.
pub struct SealWrapper {
    wrapper: Arc<dyn Wrapper>,
    name: String,
    priority: i32,
    seal_config_type: String,
    disabled: bool,
    health: RwLock<WrapperHealth>,
}

impl SealWrapper {
    /// Wrap `wrapper` under the given identity. Starts healthy.
    pub fn new(
        wrapper: Arc<dyn Wrapper>,
        name: impl Into<String>,
        priority: i32,
        seal_config_type: impl Into<String>,
        disabled: bool,
    ) -> Self {
        Self {
            wrapper,
            name: name.into(),
            priority,
            seal_config_type: seal_config_type.into(),
            disabled,
            health: RwLock::new(WrapperHealth {
                healthy: true,
                last_health_check: None,
                last_seen_healthy: Some(Utc::now()),
            }),
        }
    }

    /// Wrap `wrapper` under the identity declared by `descriptor`.
    pub fn from_descriptor(descriptor: &SealDescriptor, wrapper: Arc<dyn Wrapper>) -> Self {
        Self::new(
            wrapper,
            descriptor.name.clone(),
            descriptor.priority,
            descriptor.seal_type.clone(),
            descriptor.disabled,
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower is tried first.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn seal_config_type(&self) -> &str {
        &self.seal_config_type
    }

    /// Disabled wrappers decrypt but never encrypt.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// The underlying capability.
    #[must_use]
    pub fn wrapper(&self) -> &Arc<dyn Wrapper> {
        &self.wrapper
    }

    /// Descriptor matching this wrapper's identity.
    #[must_use]
    pub fn descriptor(&self) -> SealDescriptor {
        SealDescriptor {
            seal_type: self.seal_config_type.clone(),
            name: self.name.clone(),
            priority: self.priority,
            disabled: self.disabled,
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.health.read().unwrap_or_else(PoisonError::into_inner).healthy
    }

    /// Snapshot of the health fields.
    #[must_use]
    pub fn health(&self) -> WrapperHealth {
        *self.health.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the result of a health check taken at `checked_at`. Returns the
    /// previous `healthy` value.
    pub fn record_health_check(&self, healthy: bool, checked_at: DateTime<Utc>) -> bool {
        let mut health = self.health.write().unwrap_or_else(PoisonError::into_inner);
        let was_healthy = health.healthy;
        health.healthy = healthy;
        health.last_health_check = Some(checked_at);
        if healthy {
            health.last_seen_healthy = Some(checked_at);
        }
        was_healthy
    }

    /// Flag the wrapper unhealthy after a failed call. Returns the previous
    /// `healthy` value.
    pub fn mark_unhealthy(&self) -> bool {
        let mut health = self.health.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut health.healthy, false)
    }

    /// Current key ID of the underlying wrapper.
    ///
    /// # Errors
    ///
    /// Propagates the wrapper's error.
    pub async fn key_id(&self) -> Result<String, WrapperError> {
        self.wrapper.key_id().await
    }

    /// Encrypt through the underlying wrapper.
    ///
    /// # Errors
    ///
    /// Propagates the wrapper's error.
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        opts: &WrapOptions,
    ) -> Result<BlobInfo, WrapperError> {
        self.wrapper.encrypt(plaintext, opts).await
    }

    /// Decrypt through the underlying wrapper.
    ///
    /// # Errors
    ///
    /// Propagates the wrapper's error.
    pub async fn decrypt(&self, blob: &BlobInfo, opts: &WrapOptions) -> Result<Vec<u8>, WrapperError> {
        self.wrapper.decrypt(blob, opts).await
    }
}

impl fmt::Debug for SealWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealWrapper")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("seal_config_type", &self.seal_config_type)
            .field("disabled", &self.disabled)
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}
