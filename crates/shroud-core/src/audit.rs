//! Secret access log.
//!
//! Every attempted or successful create/view/edit/delete/restore/purge on a
//! secret produces one [`AccessLogEntry`]. Entries copy the secret's name,
//! organization and creator at write time, so the history stays readable
//! after the record itself has been purged.
//!
//! Entries go to a queryable storage-backed log first and then to any extra
//! sinks (e.g. [`FileAccessLog`](crate::audit_file::FileAccessLog)). Logging
//! is best-effort: a view that already consumed budget must still hand back
//! its plaintext, so sink failures are reported through `tracing` instead of
//! failing the request.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shroud_storage::StorageBackend;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::error::AuditError;
use crate::gate::Denial;
use crate::record::SecretRecord;

/// Storage prefix for access log entries.
const ACCESS_PREFIX: &str = "access/";

/// What was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    Create,
    View,
    Edit,
    Delete,
    Restore,
    Purge,
}

/// How it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "reason")]
pub enum AccessOutcome {
    Success,
    Denied(Denial),
    WrongPassword,
}

/// Caller metadata passed through from the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Acting identity; `None` for anonymous public-link access.
    pub actor: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Context for an anonymous caller with no network metadata.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context for a known actor with no network metadata.
    #[must_use]
    pub fn actor(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            ..Self::default()
        }
    }
}

/// One append-only access log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
    pub id: Uuid,
    pub secret_id: Uuid,
    pub actor: Option<String>,
    pub action: AccessAction,
    pub outcome: AccessOutcome,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Denormalized at write time.
    pub secret_name: String,
    pub organization_id: String,
    pub secret_owner: Option<String>,
}

impl AccessLogEntry {
    /// Build an entry for `record`, copying its name and owner.
    #[must_use]
    pub fn new(
        record: &SecretRecord,
        action: AccessAction,
        outcome: AccessOutcome,
        ctx: &RequestContext,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            secret_id: record.id,
            actor: ctx.actor.clone(),
            action,
            outcome,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            timestamp,
            secret_name: record.name.clone(),
            organization_id: record.organization_id.clone(),
            secret_owner: record.created_by.clone(),
        }
    }

    /// Storage key: ordered by timestamp within a secret.
    fn storage_key(&self) -> String {
        format!(
            "{ACCESS_PREFIX}{}/{:020}-{}",
            self.secret_id,
            self.timestamp.timestamp_micros().max(0),
            self.id
        )
    }
}

/// Window over a secret's history. The caller's retention entitlement is
/// decided upstream and arrives here as `since`/`limit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ActivityQuery {
    /// Only entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// At most this many entries, newest kept.
    pub limit: Option<usize>,
}

/// A destination for access log entries.
///
/// Implementations must be safe to share across async tasks.
#[async_trait::async_trait]
pub trait AccessLogSink: Send + Sync {
    /// The sink's name (for error reporting).
    fn name(&self) -> &str;

    /// Append an entry. Must not silently drop entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry could not be persisted.
    async fn append(&self, entry: &AccessLogEntry) -> Result<(), AuditError>;
}

/// Access log kept in the same storage backend as the records, under
/// `access/<secret_id>/`. The sweeper never touches this prefix.
pub struct StorageAccessLog {
    storage: Arc<dyn StorageBackend>,
}

impl StorageAccessLog {
    /// Create a log over the given backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Entries for one secret, oldest first, filtered by `query`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Storage`] if the backend fails and
    /// [`AuditError::Serialization`] if a stored entry is corrupt.
    pub async fn entries(
        &self,
        secret_id: Uuid,
        query: ActivityQuery,
    ) -> Result<Vec<AccessLogEntry>, AuditError> {
        let prefix = format!("{ACCESS_PREFIX}{secret_id}/");
        let keys = self.storage.list(&prefix).await?;

        let mut entries = Vec::with_capacity(keys.len());
        for key in &keys {
            let Some(bytes) = self.storage.get(key).await? else {
                continue;
            };
            let entry: AccessLogEntry =
                serde_json::from_slice(&bytes).map_err(|e| AuditError::Serialization {
                    reason: format!("{key}: {e}"),
                })?;
            if query.since.is_none_or(|since| entry.timestamp >= since) {
                entries.push(entry);
            }
        }

        if let Some(limit) = query.limit {
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
        }
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl AccessLogSink for StorageAccessLog {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "storage"
    }

    async fn append(&self, entry: &AccessLogEntry) -> Result<(), AuditError> {
        let bytes = serde_json::to_vec(entry).map_err(|e| AuditError::Serialization {
            reason: e.to_string(),
        })?;
        self.storage.put(&entry.storage_key(), &bytes).await?;
        Ok(())
    }
}

impl std::fmt::Debug for StorageAccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAccessLog").finish_non_exhaustive()
    }
}

/// Fans entries out to the queryable log and any extra sinks.
///
/// Timestamps handed out by [`AccessLog::next_timestamp`] strictly increase,
/// so an entry written after another always sorts after it.
pub struct AccessLog {
    primary: StorageAccessLog,
    sinks: RwLock<Vec<Arc<dyn AccessLogSink>>>,
    last_micros: AtomicI64,
}

impl AccessLog {
    /// Create an access log whose queryable history lives in `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            primary: StorageAccessLog::new(storage),
            sinks: RwLock::new(Vec::new()),
            last_micros: AtomicI64::new(0),
        }
    }

    /// The wall clock, bumped by a microsecond when needed to stay strictly
    /// after every timestamp this log handed out before.
    pub fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let wall = now.timestamp_micros();
        let bump = |last: i64| wall.max(last.saturating_add(1));
        let previous = match self
            .last_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(bump(last)))
        {
            Ok(last) | Err(last) => last,
        };
        DateTime::from_timestamp_micros(bump(previous)).unwrap_or(now)
    }

    /// Register an additional sink.
    pub async fn add_sink(&self, sink: Arc<dyn AccessLogSink>) {
        self.sinks.write().await.push(sink);
    }

    /// Record an entry everywhere. Failures are logged, never returned.
    pub async fn record(&self, entry: &AccessLogEntry) {
        if let Err(e) = self.primary.append(entry).await {
            warn!(
                sink = self.primary.name(),
                secret_id = %entry.secret_id,
                error = %e,
                "access log write failed"
            );
        }
        for sink in self.sinks.read().await.iter() {
            if let Err(e) = sink.append(entry).await {
                warn!(
                    sink = sink.name(),
                    secret_id = %entry.secret_id,
                    error = %e,
                    "access log write failed"
                );
            }
        }
    }

    /// History for one secret, oldest first.
    ///
    /// # Errors
    ///
    /// See [`StorageAccessLog::entries`].
    pub async fn entries(
        &self,
        secret_id: Uuid,
        query: ActivityQuery,
    ) -> Result<Vec<AccessLogEntry>, AuditError> {
        self.primary.entries(secret_id, query).await
    }
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLog").finish_non_exhaustive()
    }
}
