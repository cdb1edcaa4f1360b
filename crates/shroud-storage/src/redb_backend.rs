//! Pure-Rust redb storage backend.
//!
//! The persistent default. redb uses a copy-on-write B-tree with
//! serializable write transactions, which is exactly what
//! [`compare_and_swap`](StorageBackend::compare_and_swap) needs: the read of
//! the current value and the conditional write happen inside one write
//! transaction, and redb admits a single writer at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::{StorageBackend, StorageError};

/// The single table used for all key-value data.
/// Key namespacing is handled by the engine's store layer.
const DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("data");

/// A storage backend backed by redb (pure Rust, B-tree based).
///
/// Thread-safe via `Arc<Database>`. Blocking redb calls are offloaded to the
/// Tokio blocking thread pool.
///
/// # Examples
///
/// ```no_run
/// # use shroud_storage::RedbBackend;
/// let backend = RedbBackend::open("/var/lib/shroud/data.redb").unwrap();
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open or create a redb database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if redb fails to open or create the
    /// database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // Opening the table in a write txn creates it if missing.
        let txn = db.begin_write().map_err(txn_error)?;
        {
            let _table = txn.open_table(DATA_TABLE).map_err(table_error)?;
        }
        txn.commit().map_err(txn_error)?;

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Return the filesystem path of this database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a blocking closure against the database on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::Transaction {
                reason: format!("blocking task panicked: {e}"),
            })?
    }
}

fn txn_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

fn table_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::MissingTable {
        name: format!("data: {e}"),
    }
}

#[async_trait::async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_owned();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(txn_error)?;
            let table = txn.open_table(DATA_TABLE).map_err(table_error)?;
            let value = table
                .get(key.as_str())
                .map_err(|e| StorageError::Read {
                    key: key.clone(),
                    reason: e.to_string(),
                })?
                .map(|v| v.value().to_vec());
            Ok(value)
        })
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let key = key.to_owned();
        let value = value.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(txn_error)?;
            {
                let mut table = txn.open_table(DATA_TABLE).map_err(table_error)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(|e| StorageError::Write {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
            }
            txn.commit().map_err(txn_error)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_owned();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(txn_error)?;
            {
                let mut table = txn.open_table(DATA_TABLE).map_err(table_error)?;
                table
                    .remove(key.as_str())
                    .map_err(|e| StorageError::Delete {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
            }
            txn.commit().map_err(txn_error)
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = prefix.to_owned();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(txn_error)?;
            let table = txn.open_table(DATA_TABLE).map_err(table_error)?;
            let list_error = |e: redb::StorageError| StorageError::List {
                prefix: prefix.clone(),
                reason: e.to_string(),
            };

            let mut keys = Vec::new();
            for item in table.range(prefix.as_str()..).map_err(list_error)? {
                let (k, _) = item.map_err(list_error)?;
                let key = k.value();
                if !key.starts_with(&prefix) {
                    break;
                }
                keys.push(key.to_owned());
            }
            Ok(keys)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool, StorageError> {
        let key = key.to_owned();
        let expected = expected.map(<[u8]>::to_vec);
        let new = new.map(<[u8]>::to_vec);
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(txn_error)?;
            {
                let mut table = txn.open_table(DATA_TABLE).map_err(table_error)?;
                let current = table
                    .get(key.as_str())
                    .map_err(|e| StorageError::Read {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?
                    .map(|v| v.value().to_vec());

                if current != expected {
                    debug!(key = %key, "compare-and-swap guard failed");
                    return Ok(false);
                }

                let write_error = |e: redb::StorageError| StorageError::Write {
                    key: key.clone(),
                    reason: e.to_string(),
                };
                match &new {
                    Some(value) => {
                        table
                            .insert(key.as_str(), value.as_slice())
                            .map_err(write_error)?;
                    }
                    None => {
                        table.remove(key.as_str()).map_err(write_error)?;
                    }
                }
            }
            txn.commit().map_err(txn_error)?;
            Ok(true)
        })
        .await
    }
}
