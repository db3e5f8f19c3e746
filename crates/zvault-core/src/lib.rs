//! Seal core for `ZVault`.
//!
//! Contains the multi-wrapper seal [`Access`](access::Access), the wrapper
//! capability trait and built-in wrappers, seal-wrapped value encoding,
//! persistence of the stored barrier keys and recovery key, the encryption
//! barrier, and the seal/unseal lifecycle. This crate depends on
//! `zvault-storage` for the storage backend trait and knows nothing about
//! specific backends.

pub mod access;
pub mod barrier;
pub mod crypto;
pub mod error;
pub mod generation;
pub mod seal;
pub mod seal_wrapper;
pub mod shamir;
pub mod stored_keys;
pub mod wrapped_value;
pub mod wrapping;

#[cfg(test)]
pub(crate) mod testing;
