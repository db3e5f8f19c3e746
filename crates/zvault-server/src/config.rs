//! Server configuration for `ZVault`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `ZVAULT_*` environment variables.

use std::collections::HashMap;

use zvault_core::generation::SealDescriptor;
use zvault_core::wrapping::SHAMIR_SEAL_TYPE;

use crate::error::ServerError;

/// Prefix of the per-seal key variables, e.g. `ZVAULT_SEAL_KEY_PRIMARY`.
pub const SEAL_KEY_PREFIX: &str = "ZVAULT_SEAL_KEY_";

/// Prefix of the optional per-seal key ID variables.
pub const SEAL_KEY_ID_PREFIX: &str = "ZVAULT_SEAL_KEY_ID_";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Configured seals, in any order.
    pub seals: Vec<SealDescriptor>,
    /// Generation of the configured seal set.
    pub seal_generation: u64,
    /// Hex-encoded keys for `aead` seals, keyed by upper-cased seal name.
    pub seal_keys: HashMap<String, String>,
    /// Key IDs for `aead` seals, keyed by upper-cased seal name.
    pub seal_key_ids: HashMap<String, String>,
    /// Base64 unseal shares submitted at startup (Shamir seals).
    pub unseal_keys: Vec<String>,
    /// Share count for initializing an empty vault. Unset means do not init.
    pub init_shares: Option<u8>,
    /// Threshold for initializing an empty vault.
    pub init_threshold: u8,
    /// Seconds between seal health checks.
    pub health_check_interval_secs: u64,
    /// Seconds before a single wrapper health check times out.
    pub health_check_timeout_secs: u64,
    /// Seconds before any single seal wrapper call is abandoned.
    pub seal_timeout_secs: u64,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `RocksDB` persistent storage.
    RocksDb { path: String },
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `ZVAULT_STORAGE` — `memory` or `rocksdb` (default: `memory`)
    /// - `ZVAULT_STORAGE_PATH` — path for persistent backends (default: `./data`)
    /// - `ZVAULT_LOG_LEVEL` — log filter (default: `info`)
    /// - `ZVAULT_SEALS` — JSON list of seal descriptors (default: one Shamir seal)
    /// - `ZVAULT_SEAL_GENERATION` — generation of that list (default: `1`)
    /// - `ZVAULT_SEAL_KEY_<NAME>` — hex 32-byte key for the `aead` seal `<name>`
    /// - `ZVAULT_SEAL_KEY_ID_<NAME>` — key ID for that seal (default: its name)
    /// - `ZVAULT_UNSEAL_KEYS` — comma-separated base64 unseal shares
    /// - `ZVAULT_INIT_SHARES` / `ZVAULT_INIT_THRESHOLD` — initialize an empty vault
    /// - `ZVAULT_HEALTH_CHECK_INTERVAL` — seconds between seal health checks (default: `60`)
    /// - `ZVAULT_HEALTH_CHECK_TIMEOUT` — seconds per wrapper health check (default: `10`)
    /// - `ZVAULT_SEAL_TIMEOUT` — seconds per seal wrapper call (default: `30`)
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_vars(std::env::vars())
    }

    /// Build the configuration from `(name, value)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if a variable is set but malformed.
    pub fn from_vars<I>(vars: I) -> Result<Self, ServerError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let get = |name: &str| vars.get(name).map(|v| v.trim().to_owned());

        let storage_path = get("ZVAULT_STORAGE_PATH").unwrap_or_else(|| "./data".to_owned());
        let storage_backend = match get("ZVAULT_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackendType::Memory,
            "rocksdb" => StorageBackendType::RocksDb { path: storage_path },
            other => {
                return Err(ServerError::Config {
                    name: "ZVAULT_STORAGE",
                    reason: format!("unknown storage backend '{other}'"),
                });
            }
        };

        let seals = match get("ZVAULT_SEALS") {
            Some(json) => serde_json::from_str(&json).map_err(|e| ServerError::Config {
                name: "ZVAULT_SEALS",
                reason: e.to_string(),
            })?,
            None => vec![SealDescriptor::new(SHAMIR_SEAL_TYPE, "shamir", 1)],
        };

        let mut seal_keys = HashMap::new();
        let mut seal_key_ids = HashMap::new();
        for (name, value) in &vars {
            if let Some(seal) = name.strip_prefix(SEAL_KEY_ID_PREFIX) {
                seal_key_ids.insert(seal.to_owned(), value.trim().to_owned());
            } else if let Some(seal) = name.strip_prefix(SEAL_KEY_PREFIX) {
                seal_keys.insert(seal.to_owned(), value.trim().to_owned());
            }
        }

        let unseal_keys = get("ZVAULT_UNSEAL_KEYS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let init_shares = parse_opt::<u8>(&get, "ZVAULT_INIT_SHARES")?;
        let init_threshold =
            parse_opt::<u8>(&get, "ZVAULT_INIT_THRESHOLD")?.unwrap_or_else(|| match init_shares {
                Some(1) | None => 1,
                Some(n) => n / 2 + 1,
            });

        Ok(Self {
            storage_backend,
            log_level: get("ZVAULT_LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
            seals,
            seal_generation: parse_opt(&get, "ZVAULT_SEAL_GENERATION")?.unwrap_or(1),
            seal_keys,
            seal_key_ids,
            unseal_keys,
            init_shares,
            init_threshold,
            health_check_interval_secs: parse_opt(&get, "ZVAULT_HEALTH_CHECK_INTERVAL")?
                .unwrap_or(60),
            health_check_timeout_secs: parse_opt(&get, "ZVAULT_HEALTH_CHECK_TIMEOUT")?
                .unwrap_or(10),
            seal_timeout_secs: parse_opt(&get, "ZVAULT_SEAL_TIMEOUT")?.unwrap_or(30),
        })
    }

    /// Hex key configured for the seal named `seal_name`.
    #[must_use]
    pub fn seal_key(&self, seal_name: &str) -> Option<&str> {
        self.seal_keys
            .get(&env_suffix(seal_name))
            .map(String::as_str)
    }

    /// Key ID for the seal named `seal_name`, defaulting to the name.
    #[must_use]
    pub fn seal_key_id(&self, seal_name: &str) -> String {
        self.seal_key_ids
            .get(&env_suffix(seal_name))
            .cloned()
            .unwrap_or_else(|| seal_name.to_owned())
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut key_names: Vec<_> = self.seal_keys.keys().collect();
        key_names.sort();
        f.debug_struct("ServerConfig")
            .field("storage_backend", &self.storage_backend)
            .field("log_level", &self.log_level)
            .field("seals", &self.seals)
            .field("seal_generation", &self.seal_generation)
            .field("seal_keys", &key_names)
            .field("unseal_keys", &self.unseal_keys.len())
            .field("init_shares", &self.init_shares)
            .field("init_threshold", &self.init_threshold)
            .field("health_check_interval_secs", &self.health_check_interval_secs)
            .field("seal_timeout_secs", &self.seal_timeout_secs)
            .finish_non_exhaustive()
    }
}

/// Environment-variable suffix for a seal name: upper-cased, `-` → `_`.
fn env_suffix(seal_name: &str) -> String {
    seal_name.to_uppercase().replace('-', "_")
}

fn parse_opt<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ServerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get(name)
        .map(|v| {
            v.parse().map_err(|e: T::Err| ServerError::Config {
                name,
                reason: e.to_string(),
            })
        })
        .transpose()
}
