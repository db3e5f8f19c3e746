//! `RocksDB` storage backend.
//!
//! Every call is dispatched through [`tokio::task::spawn_blocking`] because
//! `RocksDB` is a synchronous C++ library. Keys are stored as their UTF-8
//! bytes; values are stored as-is.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options};
use tracing::debug;

use crate::{Entry, StorageBackend, StorageError, fold_listing};

type Db = DBWithThreadMode<MultiThreaded>;

/// A persistent storage backend backed by `RocksDB`.
///
/// # Examples
///
/// ```no_run
/// # use zvault_storage::RocksDbBackend;
/// let backend = RocksDbBackend::open("/var/lib/zvault/data").unwrap();
/// ```
#[derive(Clone)]
pub struct RocksDbBackend {
    db: Arc<Db>,
    path: PathBuf,
}

impl std::fmt::Debug for RocksDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RocksDbBackend {
    /// Open (or create) a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if `RocksDB` cannot open the directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = Db::open(&opts, path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "opened RocksDB storage");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Filesystem path of this database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` on the blocking pool, mapping a join failure to
    /// [`StorageError::Task`].
    async fn blocking<T, F>(&self, key: &str, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::Task {
                key: key.to_owned(),
                reason: e.to_string(),
            })?
    }
}

#[async_trait::async_trait]
impl StorageBackend for RocksDbBackend {
    async fn get(&self, key: &str) -> Result<Option<Entry>, StorageError> {
        let owned = key.to_owned();
        self.blocking(key, move |db| {
            let value = db.get(owned.as_bytes()).map_err(|e| StorageError::Read {
                key: owned.clone(),
                reason: e.to_string(),
            })?;
            Ok(value.map(|v| Entry::new(owned, v)))
        })
        .await
    }

    async fn put(&self, entry: &Entry) -> Result<(), StorageError> {
        let entry = entry.clone();
        let key = entry.key.clone();
        self.blocking(&key, move |db| {
            db.put(entry.key.as_bytes(), &entry.value)
                .map_err(|e| StorageError::Write {
                    key: entry.key,
                    reason: e.to_string(),
                })
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let owned = key.to_owned();
        self.blocking(key, move |db| {
            db.delete(owned.as_bytes()).map_err(|e| StorageError::Delete {
                key: owned,
                reason: e.to_string(),
            })
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let owned = prefix.to_owned();
        self.blocking(prefix, move |db| {
            let mut keys = Vec::new();
            let iter = db.iterator(IteratorMode::From(owned.as_bytes(), Direction::Forward));
            for item in iter {
                let (k, _) = item.map_err(|e| StorageError::List {
                    prefix: owned.clone(),
                    reason: e.to_string(),
                })?;
                let key = String::from_utf8(k.to_vec()).map_err(|e| StorageError::InvalidKey {
                    reason: e.to_string(),
                })?;
                if !key.starts_with(&owned) {
                    break;
                }
                keys.push(key);
            }
            Ok(fold_listing(&owned, keys))
        })
        .await
    }
}
