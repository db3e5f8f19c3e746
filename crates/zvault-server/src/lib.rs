//! `ZVault` server.
//!
//! Wires the seal core to a storage backend: loads configuration from the
//! environment, builds the configured seal wrappers, adopts the seal
//! generation, initializes and unseals the vault, and keeps the seal
//! wrappers under periodic health checks until shutdown.

pub mod bootstrap;
pub mod config;
pub mod error;
