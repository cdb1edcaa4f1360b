//! Lifecycle coordinator: the only component that mutates a secret.
//!
//! A view runs gate, key derivation, verification, decryption and the
//! counter update in that order. The counter update is a compare-and-swap
//! against the bytes the gate decision was made on; losing that race means
//! the decision is re-made on the fresh record, which is how concurrent
//! viewers of a burn-on-read secret end up with exactly one winner. The
//! plaintext is decrypted before the swap and only leaves this module when
//! the swap wins.
//!
//! Owner operations (policy edits, soft delete, restore) use the same
//! load/modify/swap loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use shroud_storage::StorageBackend;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::audit::{
    AccessAction, AccessLog, AccessLogEntry, AccessOutcome, ActivityQuery, RequestContext,
};
use crate::cipher;
use crate::error::EngineError;
use crate::gate::{self, AccessDecision, Denial};
use crate::kdf::{self, DerivedKey, Salt};
use crate::record::{
    DisclosurePolicy, EncryptedPayload, SecretRecord, SecretSummary, TrashEntry,
    retention_elapsed,
};
use crate::store::SecretStore;
use crate::sweeper::RetentionSweeper;

/// Conditional-write attempts before a view or edit gives up.
pub const MAX_CAS_ATTEMPTS: u32 = 16;

/// Longest accepted secret name, in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// Largest accepted plaintext, in bytes.
pub const MAX_PLAINTEXT_LEN: usize = 64 * 1024;

/// Input to [`LifecycleCoordinator::create`].
pub struct CreateSecret {
    pub organization_id: String,
    pub team_id: Option<String>,
    pub name: String,
    pub plaintext: Zeroizing<String>,
    pub password: Zeroizing<String>,
    pub max_views: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub burn_on_read: bool,
}

impl CreateSecret {
    fn validate(&self) -> Result<(), EngineError> {
        if self.organization_id.trim().is_empty() {
            return Err(invalid("organization id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(invalid(format!("name exceeds {MAX_NAME_LEN} bytes")));
        }
        if self.plaintext.is_empty() {
            return Err(invalid("secret value must not be empty"));
        }
        if self.plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(invalid(format!("secret value exceeds {MAX_PLAINTEXT_LEN} bytes")));
        }
        if self.password.is_empty() {
            return Err(invalid("password must not be empty"));
        }
        if self.max_views == Some(0) {
            return Err(invalid("maxViews must be at least 1"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CreateSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateSecret")
            .field("organization_id", &self.organization_id)
            .field("team_id", &self.team_id)
            .field("name", &self.name)
            .field("max_views", &self.max_views)
            .field("expires_at", &self.expires_at)
            .field("burn_on_read", &self.burn_on_read)
            .finish_non_exhaustive()
    }
}

/// A partial policy change. Absent fields are left alone; an explicit
/// `null` clears `maxViews` or `expiresAt`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicyUpdate {
    #[serde(default, deserialize_with = "present")]
    pub max_views: Option<Option<u32>>,
    #[serde(default)]
    pub burn_on_read: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

impl PolicyUpdate {
    /// Whether the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.max_views.is_none() && self.burn_on_read.is_none() && self.expires_at.is_none()
    }

    fn apply(&self, policy: &DisclosurePolicy) -> DisclosurePolicy {
        DisclosurePolicy {
            max_views: self.max_views.unwrap_or(policy.max_views),
            burn_on_read: self.burn_on_read.unwrap_or(policy.burn_on_read),
            expires_at: self.expires_at.unwrap_or(policy.expires_at),
        }
    }
}

/// Distinguishes a present `null` from an absent field.
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A successful view.
pub struct RevealedSecret {
    pub plaintext: Zeroizing<String>,
    /// View count after this view.
    pub view_count: u32,
    pub remaining_views: Option<u32>,
    /// This view burned the secret.
    pub burned: bool,
}

impl std::fmt::Debug for RevealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevealedSecret")
            .field("plaintext", &"[REDACTED]")
            .field("view_count", &self.view_count)
            .field("remaining_views", &self.remaining_views)
            .field("burned", &self.burned)
            .finish()
    }
}

/// Result of [`LifecycleCoordinator::view`]. Denials and wrong passwords are
/// ordinary outcomes, not errors.
#[derive(Debug)]
pub enum ViewOutcome {
    Revealed(RevealedSecret),
    Denied(Denial),
    WrongPassword,
}

/// Creates, reveals and manages secrets.
#[derive(Debug, Clone)]
pub struct LifecycleCoordinator {
    store: SecretStore,
    access_log: Arc<AccessLog>,
    sweeper: RetentionSweeper,
    sweep_on_write: bool,
}

impl LifecycleCoordinator {
    /// Coordinator whose records and access log share `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        let store = SecretStore::new(Arc::clone(&storage));
        let access_log = Arc::new(AccessLog::new(storage));
        let sweeper = RetentionSweeper::new(store.clone(), Arc::clone(&access_log));
        Self {
            store,
            access_log,
            sweeper,
            sweep_on_write: false,
        }
    }

    /// Purge a record right after the view that made it terminal instead of
    /// waiting for the next sweep.
    ///
    /// With this on, late viewers of a burned secret see `Deleted` rather
    /// than `AlreadyBurned` once the purge has landed.
    #[must_use]
    pub fn with_sweep_on_write(mut self, enabled: bool) -> Self {
        self.sweep_on_write = enabled;
        self
    }

    /// The access log, e.g. to attach extra sinks.
    #[must_use]
    pub fn access_log(&self) -> &Arc<AccessLog> {
        &self.access_log
    }

    /// A sweeper over the same store.
    #[must_use]
    pub fn sweeper(&self) -> &RetentionSweeper {
        &self.sweeper
    }

    /// Encrypt and persist a new secret.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] for bad input, and crypto or
    /// storage errors otherwise.
    pub async fn create(
        &self,
        request: CreateSecret,
        ctx: &RequestContext,
    ) -> Result<SecretSummary, EngineError> {
        request.validate()?;

        let salt = Salt::generate();
        let key = derive_off_thread(&request.password, salt).await?;
        let sealed = cipher::encrypt(&key, request.plaintext.as_bytes())?;

        let now = Utc::now();
        let record = SecretRecord {
            id: Uuid::new_v4(),
            organization_id: request.organization_id,
            team_id: request.team_id,
            created_by: ctx.actor.clone(),
            name: request.name,
            payload: EncryptedPayload::encode(&sealed, &salt, &key),
            policy: DisclosurePolicy {
                max_views: request.max_views,
                burn_on_read: request.burn_on_read,
                expires_at: request.expires_at,
            },
            view_count: 0,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&record).await?;
        self.log(&record, AccessAction::Create, AccessOutcome::Success, ctx)
            .await;

        info!(
            secret_id = %record.id,
            org = %record.organization_id,
            max_views = ?record.policy.max_views,
            burn_on_read = record.policy.burn_on_read,
            "secret created"
        );
        Ok(SecretSummary::of(&record, now))
    }

    /// Attempt to reveal a secret with `password`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Integrity`] if the ciphertext fails authentication
    ///   under a key whose verification hash matched.
    /// - [`EngineError::Contention`] after [`MAX_CAS_ATTEMPTS`] lost races.
    /// - Storage and payload decoding errors.
    pub async fn view(
        &self,
        id: Uuid,
        password: &str,
        ctx: &RequestContext,
    ) -> Result<ViewOutcome, EngineError> {
        let Some(mut current) = self.store.load(id).await? else {
            info!(secret_id = %id, reason = %Denial::Deleted, "view denied: secret does not exist");
            return Ok(ViewOutcome::Denied(Denial::Deleted));
        };
        if let AccessDecision::Denied(denial) = gate::evaluate(&current.record, Utc::now()) {
            return Ok(self.deny(&current.record, denial, ctx).await);
        }

        if password.is_empty() {
            return Ok(self.wrong_password(&current.record, ctx).await);
        }
        let salt = current.record.payload.salt()?;
        let key = derive_off_thread(password, salt).await?;
        if !key.matches(&current.record.payload.verification_hash()?) {
            return Ok(self.wrong_password(&current.record, ctx).await);
        }
        let plaintext = open(&current.record, &key)?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let now = Utc::now();
            let next = gate::consume(&current.record, now);
            if let Some(committed) = self.store.replace(&current, &next).await? {
                return Ok(self.reveal(committed.record, plaintext, ctx, now).await);
            }

            debug!(secret_id = %id, attempt, "lost view race, re-evaluating");
            let Some(fresh) = self.store.load(id).await? else {
                info!(secret_id = %id, reason = %Denial::Deleted, "view denied: secret purged concurrently");
                return Ok(ViewOutcome::Denied(Denial::Deleted));
            };
            if let AccessDecision::Denied(denial) = gate::evaluate(&fresh.record, Utc::now()) {
                return Ok(self.deny(&fresh.record, denial, ctx).await);
            }
            current = fresh;
        }

        warn!(secret_id = %id, attempts = MAX_CAS_ATTEMPTS, "view abandoned under contention");
        Err(EngineError::Contention {
            id: id.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Metadata for a secret that still exists (live or soft-deleted).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the record was never created or
    /// has been purged.
    pub async fn summary(&self, id: Uuid) -> Result<SecretSummary, EngineError> {
        let current = self.store.load(id).await?.ok_or_else(|| not_found(id))?;
        Ok(SecretSummary::of(&current.record, Utc::now()))
    }

    /// Change the disclosure policy of a live secret.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidRequest`] for an empty update, `maxViews` of 0
    ///   or below the current view count, or enabling burn-on-read on a
    ///   secret that was already viewed.
    /// - [`EngineError::NotFound`] if the secret is missing or deleted.
    pub async fn update_policy(
        &self,
        id: Uuid,
        update: &PolicyUpdate,
        ctx: &RequestContext,
    ) -> Result<SecretSummary, EngineError> {
        if update.is_empty() {
            return Err(invalid("policy update changes nothing"));
        }
        if update.max_views == Some(Some(0)) {
            return Err(invalid("maxViews must be at least 1"));
        }

        let (_, updated) = self
            .mutate(id, |record, now| {
                if record.deleted_at.is_some() {
                    return Err(not_found(id));
                }
                let policy = update.apply(&record.policy);
                match policy.max_views {
                    Some(max) if max < record.view_count => {
                        return Err(invalid(format!(
                            "maxViews {max} is below the current view count {}",
                            record.view_count
                        )));
                    }
                    _ => {}
                }
                if policy.burn_on_read && !record.policy.burn_on_read && record.view_count > 0 {
                    return Err(invalid(
                        "burn-on-read cannot be enabled on a secret that was already viewed",
                    ));
                }
                let mut next = record.clone();
                next.policy = policy;
                next.updated_at = now;
                Ok(next)
            })
            .await?;

        self.log(&updated, AccessAction::Edit, AccessOutcome::Success, ctx)
            .await;
        info!(secret_id = %id, policy = ?updated.policy, "secret policy updated");
        Ok(SecretSummary::of(&updated, updated.updated_at))
    }

    /// Soft-delete a secret into the trash.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the secret is missing or already
    /// deleted.
    pub async fn delete(&self, id: Uuid, ctx: &RequestContext) -> Result<TrashEntry, EngineError> {
        let (_, deleted) = self
            .mutate(id, |record, now| {
                if record.deleted_at.is_some() {
                    return Err(not_found(id));
                }
                let mut next = record.clone();
                next.deleted_at = Some(now);
                next.deleted_by.clone_from(&ctx.actor);
                next.updated_at = now;
                Ok(next)
            })
            .await?;

        let entry = TrashEntry::new(&deleted, deleted.deleted_by.clone(), deleted.updated_at);
        // The record is already deleted; a missing entry is rebuilt by the
        // next sweep.
        if let Err(e) = self.store.put_trash(&entry).await {
            warn!(secret_id = %id, error = %e, "failed to write trash entry");
        }
        self.log(&deleted, AccessAction::Delete, AccessOutcome::Success, ctx)
            .await;
        info!(secret_id = %id, purge_after = %entry.purge_after, "secret moved to trash");
        Ok(entry)
    }

    /// Bring a soft-deleted secret back from the trash.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidRequest`] if the secret is not deleted or was
    ///   burned.
    /// - [`EngineError::NotFound`] if it is missing or its retention window
    ///   has passed.
    pub async fn restore(
        &self,
        id: Uuid,
        ctx: &RequestContext,
    ) -> Result<SecretSummary, EngineError> {
        let (_, restored) = self
            .mutate(id, |record, now| {
                let Some(deleted_at) = record.deleted_at else {
                    return Err(invalid(format!("secret {id} is not deleted")));
                };
                if record.is_burned() {
                    return Err(invalid("a burned secret cannot be restored"));
                }
                if retention_elapsed(deleted_at, now) {
                    return Err(not_found(id));
                }
                let mut next = record.clone();
                next.deleted_at = None;
                next.deleted_by = None;
                next.updated_at = now;
                Ok(next)
            })
            .await?;

        self.store.delete_trash(id).await?;
        self.log(&restored, AccessAction::Restore, AccessOutcome::Success, ctx)
            .await;
        info!(secret_id = %id, "secret restored from trash");
        Ok(SecretSummary::of(&restored, restored.updated_at))
    }

    /// Access history for a secret, oldest first. Available after purge.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Audit`] if the log cannot be read.
    pub async fn activity(
        &self,
        id: Uuid,
        query: ActivityQuery,
    ) -> Result<Vec<AccessLogEntry>, EngineError> {
        Ok(self.access_log.entries(id, query).await?)
    }

    /// Trash entries for one organization, most recently deleted first.
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors.
    pub async fn list_trash(&self, organization_id: &str) -> Result<Vec<TrashEntry>, EngineError> {
        let mut entries: Vec<_> = self
            .store
            .trash()
            .await?
            .into_iter()
            .filter(|entry| entry.organization_id == organization_id)
            .collect();
        entries.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        Ok(entries)
    }

    /// Load, change and conditionally write a record until the write lands.
    /// Returns the record before and after the change.
    async fn mutate<F>(
        &self,
        id: Uuid,
        mut change: F,
    ) -> Result<(SecretRecord, SecretRecord), EngineError>
    where
        F: FnMut(&SecretRecord, DateTime<Utc>) -> Result<SecretRecord, EngineError>,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.store.load(id).await?.ok_or_else(|| not_found(id))?;
            let next = change(&current.record, Utc::now())?;
            if let Some(committed) = self.store.replace(&current, &next).await? {
                return Ok((current.record, committed.record));
            }
            debug!(secret_id = %id, attempt, "lost update race, retrying");
        }
        Err(EngineError::Contention {
            id: id.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    async fn reveal(
        &self,
        record: SecretRecord,
        plaintext: Zeroizing<String>,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> ViewOutcome {
        self.log(&record, AccessAction::View, AccessOutcome::Success, ctx)
            .await;
        let burned = record.is_burned();
        info!(
            secret_id = %record.id,
            view_count = record.view_count,
            burned,
            "secret revealed"
        );

        if self.sweep_on_write && gate::policy_terminal(&record, now).is_some() {
            if let Err(e) = self.sweeper.purge_if_terminal(record.id, now).await {
                warn!(secret_id = %record.id, error = %e, "post-view purge failed");
            }
        }

        ViewOutcome::Revealed(RevealedSecret {
            plaintext,
            view_count: record.view_count,
            remaining_views: record.remaining_views(),
            burned,
        })
    }

    async fn deny(
        &self,
        record: &SecretRecord,
        denial: Denial,
        ctx: &RequestContext,
    ) -> ViewOutcome {
        self.log(record, AccessAction::View, AccessOutcome::Denied(denial), ctx)
            .await;
        info!(secret_id = %record.id, reason = %denial, "view denied");
        ViewOutcome::Denied(denial)
    }

    async fn wrong_password(&self, record: &SecretRecord, ctx: &RequestContext) -> ViewOutcome {
        self.log(record, AccessAction::View, AccessOutcome::WrongPassword, ctx)
            .await;
        info!(secret_id = %record.id, "view refused: wrong password");
        ViewOutcome::WrongPassword
    }

    async fn log(
        &self,
        record: &SecretRecord,
        action: AccessAction,
        outcome: AccessOutcome,
        ctx: &RequestContext,
    ) {
        let entry =
            AccessLogEntry::new(record, action, outcome, ctx, self.access_log.next_timestamp());
        self.access_log.record(&entry).await;
    }
}

/// Run PBKDF2 on the blocking pool.
async fn derive_off_thread(password: &str, salt: Salt) -> Result<DerivedKey, EngineError> {
    let password = Zeroizing::new(password.to_owned());
    let key = tokio::task::spawn_blocking(move || kdf::derive(&password, &salt))
        .await
        .map_err(|e| EngineError::Internal {
            reason: format!("key derivation task failed: {e}"),
        })??;
    Ok(key)
}

/// Decrypt a record whose verification hash already matched `key`.
fn open(record: &SecretRecord, key: &DerivedKey) -> Result<Zeroizing<String>, EngineError> {
    let ciphertext = record.payload.ciphertext_bytes()?;
    let iv = record.payload.iv_bytes()?;
    let bytes = match cipher::decrypt(key, &ciphertext, &iv) {
        Ok(bytes) => Zeroizing::new(bytes),
        Err(e) => {
            error!(secret_id = %record.id, error = %e, "ciphertext failed authentication after password verified");
            return Err(EngineError::Integrity {
                id: record.id.to_string(),
                reason: e.to_string(),
            });
        }
    };
    let text = std::str::from_utf8(&bytes).map_err(|_| EngineError::Integrity {
        id: record.id.to_string(),
        reason: "decrypted value is not valid UTF-8".to_owned(),
    })?;
    Ok(Zeroizing::new(text.to_owned()))
}

fn not_found(id: Uuid) -> EngineError {
    EngineError::NotFound { id: id.to_string() }
}

fn invalid(reason: impl Into<String>) -> EngineError {
    EngineError::InvalidRequest {
        reason: reason.into(),
    }
}
