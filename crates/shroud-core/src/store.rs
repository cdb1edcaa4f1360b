//! Record and trash persistence on top of a [`StorageBackend`].
//!
//! Records live under `secrets/<id>` and trash entries under `trash/<id>`.
//! Every change to a record goes through [`SecretStore::replace`] or
//! [`SecretStore::remove`], which are conditional on the exact bytes the
//! caller loaded. A caller that loses the race gets `None`/`false` back and
//! must reload before trying again.

use std::sync::Arc;

use shroud_storage::StorageBackend;
use uuid::Uuid;

use crate::error::EngineError;
use crate::record::{SecretRecord, TrashEntry};

const SECRET_PREFIX: &str = "secrets/";
const TRASH_PREFIX: &str = "trash/";

/// A record together with the exact bytes it was decoded from.
///
/// The bytes are the compare value for the next conditional write, so a
/// `Versioned` is only good for one successful mutation.
#[derive(Debug, Clone)]
pub struct Versioned {
    pub record: SecretRecord,
    raw: Vec<u8>,
}

/// Typed access to records and trash entries.
#[derive(Clone)]
pub struct SecretStore {
    storage: Arc<dyn StorageBackend>,
}

impl SecretStore {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// The backend this store writes to.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Persist a brand-new record.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] if a record with the same id already
    /// exists, and storage or serialization errors otherwise.
    pub async fn insert(&self, record: &SecretRecord) -> Result<Versioned, EngineError> {
        let raw = encode(record)?;
        let inserted = self
            .storage
            .compare_and_swap(&secret_key(record.id), None, Some(&raw))
            .await?;
        if !inserted {
            return Err(EngineError::Internal {
                reason: format!("secret id collision: {}", record.id),
            });
        }
        Ok(Versioned {
            record: record.clone(),
            raw,
        })
    }

    /// Load a record, or `None` if it does not exist (never created or
    /// purged).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Serialization`] for a corrupt record and
    /// [`EngineError::Storage`] if the backend fails.
    pub async fn load(&self, id: Uuid) -> Result<Option<Versioned>, EngineError> {
        let Some(raw) = self.storage.get(&secret_key(id)).await? else {
            return Ok(None);
        };
        let record = serde_json::from_slice(&raw).map_err(|e| EngineError::Serialization {
            reason: format!("secret {id}: {e}"),
        })?;
        Ok(Some(Versioned { record, raw }))
    }

    /// Overwrite `current` with `next`, provided nobody changed the record
    /// since `current` was loaded.
    ///
    /// Returns the new version on success and `None` if the guard failed.
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors.
    pub async fn replace(
        &self,
        current: &Versioned,
        next: &SecretRecord,
    ) -> Result<Option<Versioned>, EngineError> {
        let raw = encode(next)?;
        let swapped = self
            .storage
            .compare_and_swap(&secret_key(current.record.id), Some(&current.raw), Some(&raw))
            .await?;
        Ok(swapped.then(|| Versioned {
            record: next.clone(),
            raw,
        }))
    }

    /// Permanently delete `current`, provided nobody changed it since it was
    /// loaded. Returns whether the delete happened.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] if the backend fails.
    pub async fn remove(&self, current: &Versioned) -> Result<bool, EngineError> {
        Ok(self
            .storage
            .compare_and_swap(&secret_key(current.record.id), Some(&current.raw), None)
            .await?)
    }

    /// Ids of every stored record.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] if the backend fails.
    pub async fn record_ids(&self) -> Result<Vec<Uuid>, EngineError> {
        let keys = self.storage.list(SECRET_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(SECRET_PREFIX))
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect())
    }

    /// Write (or overwrite) the trash entry for a soft-deleted record.
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors.
    pub async fn put_trash(&self, entry: &TrashEntry) -> Result<(), EngineError> {
        let raw = serde_json::to_vec(entry).map_err(|e| EngineError::Serialization {
            reason: e.to_string(),
        })?;
        self.storage.put(&trash_key(entry.secret_id), &raw).await?;
        Ok(())
    }

    /// Remove a trash entry. Removing a missing entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] if the backend fails.
    pub async fn delete_trash(&self, id: Uuid) -> Result<(), EngineError> {
        self.storage.delete(&trash_key(id)).await?;
        Ok(())
    }

    /// Every trash entry, in id order.
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors.
    pub async fn trash(&self) -> Result<Vec<TrashEntry>, EngineError> {
        let keys = self.storage.list(TRASH_PREFIX).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in &keys {
            let Some(raw) = self.storage.get(key).await? else {
                continue;
            };
            let entry = serde_json::from_slice(&raw).map_err(|e| EngineError::Serialization {
                reason: format!("{key}: {e}"),
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore").finish_non_exhaustive()
    }
}

fn secret_key(id: Uuid) -> String {
    format!("{SECRET_PREFIX}{id}")
}

fn trash_key(id: Uuid) -> String {
    format!("{TRASH_PREFIX}{id}")
}

fn encode(record: &SecretRecord) -> Result<Vec<u8>, EngineError> {
    serde_json::to_vec(record).map_err(|e| EngineError::Serialization {
        reason: format!("secret {}: {e}", record.id),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use shroud_storage::MemoryBackend;

    use super::*;
    use crate::record::DisclosurePolicy;
    use crate::record::tests::sample_record;

    fn store() -> SecretStore {
        SecretStore::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn insert_then_load() {
        let store = store();
        let record = sample_record("p@ss", DisclosurePolicy::default());
        store.insert(&record).await.unwrap();
        let loaded = store.load(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.record, record);
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = store();
        let record = sample_record("p@ss", DisclosurePolicy::default());
        store.insert(&record).await.unwrap();
        assert!(matches!(
            store.insert(&record).await,
            Err(EngineError::Internal { .. })
        ));
    }

    #[tokio::test]
    async fn stale_version_cannot_replace_or_remove() {
        let store = store();
        let record = sample_record("p@ss", DisclosurePolicy::default());
        let v0 = store.insert(&record).await.unwrap();

        let mut bumped = record.clone();
        bumped.view_count = 1;
        let v1 = store.replace(&v0, &bumped).await.unwrap().unwrap();

        let mut other = record.clone();
        other.view_count = 7;
        assert!(store.replace(&v0, &other).await.unwrap().is_none());
        assert!(!store.remove(&v0).await.unwrap());

        assert_eq!(store.load(record.id).await.unwrap().unwrap().record.view_count, 1);
        assert!(store.remove(&v1).await.unwrap());
        assert!(store.load(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_ids_ignores_trash_and_access_keys() {
        let store = store();
        let record = sample_record("p@ss", DisclosurePolicy::default());
        store.insert(&record).await.unwrap();
        store
            .put_trash(&TrashEntry::new(&record, None, Utc::now()))
            .await
            .unwrap();
        store
            .storage()
            .put(&format!("access/{}/1-x", record.id), b"{}")
            .await
            .unwrap();

        assert_eq!(store.record_ids().await.unwrap(), vec![record.id]);
    }

    #[tokio::test]
    async fn trash_put_list_delete() {
        let store = store();
        let record = sample_record("p@ss", DisclosurePolicy::default());
        let entry = TrashEntry::new(&record, Some("bob".to_owned()), Utc::now());
        store.put_trash(&entry).await.unwrap();
        assert_eq!(store.trash().await.unwrap(), vec![entry]);

        store.delete_trash(record.id).await.unwrap();
        store.delete_trash(record.id).await.unwrap();
        assert!(store.trash().await.unwrap().is_empty());
    }
}
