//! Startup errors for the `ZVault` server.
//!
//! Library errors from `zvault-core` and `zvault-storage` are wrapped here;
//! `main` converts everything to `anyhow` at the process edge.

use zvault_core::error::{AccessError, CryptoError, SealError};
use zvault_storage::StorageError;

/// Errors raised while configuring and bootstrapping the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// An environment variable is set but malformed.
    #[error("invalid {name}: {reason}")]
    Config { name: &'static str, reason: String },

    /// A configured seal cannot be built.
    #[error("invalid seal '{name}': {reason}")]
    Seal { name: String, reason: String },

    /// The requested storage backend is not compiled in.
    #[error("storage backend '{backend}' is not enabled in this build")]
    BackendDisabled { backend: &'static str },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    SealManager(#[from] SealError),
}
