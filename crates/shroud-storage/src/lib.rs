//! Storage backend abstraction for Shroud.
//!
//! This crate defines the [`StorageBackend`] trait, a pure key-value storage
//! interface that knows nothing about secrets, passwords, or view budgets.
//! The lifecycle engine in `shroud-core` builds its records, trash entries and
//! access log on top of it.
//!
//! Besides plain get/put/delete/list, every backend provides
//! [`compare_and_swap`](StorageBackend::compare_and_swap): a single
//! conditional write that is the only primitive the engine uses to mutate a
//! secret's disclosure counters.
//!
//! Two implementations are provided:
//!
//! - [`RedbBackend`]: persistent, pure-Rust, backed by redb (feature `redb-backend`)
//! - [`MemoryBackend`]: in-memory, for tests and ephemeral deployments

mod error;
mod memory;
#[cfg(feature = "redb-backend")]
mod redb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;

/// A pluggable key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g. `secrets/<id>`,
/// `access/<id>/000000001700000000000-<uuid>`). Values are opaque byte
/// arrays.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Idempotent: deleting a non-existent key is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys that start with the given prefix, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Atomically replace the value at `key` if, and only if, its current
    /// value equals `expected`.
    ///
    /// - `expected = None` means the key must currently be absent.
    /// - `new = None` deletes the key on success.
    ///
    /// Returns `Ok(true)` when the swap happened and `Ok(false)` when the
    /// current value did not match. The comparison and the write are one
    /// indivisible step with respect to every other call on the same backend.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Transaction`] or [`StorageError::Write`] if the
    /// underlying backend fails.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool, StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// The default implementation calls [`get`](StorageBackend::get) and checks
    /// for `Some`. Backends may override this with a more efficient check.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
