//! Retention sweeper: permanent purge of records that can never be viewed
//! again.
//!
//! A record is purged when it is soft-deleted and its 30-day retention
//! window has passed, or when [`gate::policy_terminal`] says no future view
//! can succeed (expired, view budget spent, burned). Retention wins when both
//! apply. Every purge is a conditional delete against the bytes the sweeper
//! just read, so a record that changed in the meantime (for example a policy
//! edit that revived it) is left alone until the next pass.
//!
//! Purging removes the record and its trash entry. Access log entries under
//! `access/` are never touched.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AccessAction, AccessLog, AccessLogEntry, AccessOutcome, RequestContext};
use crate::error::EngineError;
use crate::gate::{self, Denial};
use crate::record::{SecretRecord, TrashEntry, retention_elapsed};
use crate::store::{SecretStore, Versioned};

/// Why a record was purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeReason {
    /// Soft-deleted and past the retention window.
    Retention,
    /// Permanently unviewable under its policy.
    Terminal(Denial),
}

/// Counters from one [`RetentionSweeper::sweep`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: u64,
    pub purged_retention: u64,
    pub purged_terminal: u64,
    /// Records that changed between read and delete; retried next pass.
    pub skipped: u64,
    /// Trash entries whose record no longer existed or was no longer deleted.
    pub orphaned_trash: u64,
    /// Soft-deleted records whose missing trash entry was written again.
    pub recreated_trash: u64,
    /// Records that could not be processed because of an error.
    pub failed: u64,
}

impl SweepReport {
    /// Total records permanently removed.
    #[must_use]
    pub const fn purged(&self) -> u64 {
        self.purged_retention + self.purged_terminal
    }
}

/// Decide whether `record` should be purged at `now`.
#[must_use]
pub fn purge_reason(record: &SecretRecord, now: DateTime<Utc>) -> Option<PurgeReason> {
    if record
        .deleted_at
        .is_some_and(|deleted_at| retention_elapsed(deleted_at, now))
    {
        return Some(PurgeReason::Retention);
    }
    // Soft-deleted records inside their window stay restorable unless they
    // were burned, which restore refuses anyway.
    if record.deleted_at.is_some() && !record.is_burned() {
        return None;
    }
    gate::policy_terminal(record, now).map(PurgeReason::Terminal)
}

/// Purges dead records. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    store: SecretStore,
    access_log: Arc<AccessLog>,
}

impl RetentionSweeper {
    #[must_use]
    pub fn new(store: SecretStore, access_log: Arc<AccessLog>) -> Self {
        Self { store, access_log }
    }

    /// Scan every record and trash entry once.
    ///
    /// Besides purging, the pass reconciles the trash with the records: an
    /// entry whose record is gone or no longer deleted at that instant is
    /// removed, and a soft-deleted record without an entry gets one again.
    /// Per-record failures are counted in the report and logged; only a
    /// failure to enumerate storage aborts the pass.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] if the record or trash listing fails.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        let trash = self.store.trash().await?;
        let mut in_trash: HashSet<Uuid> = trash.iter().map(|entry| entry.secret_id).collect();

        for id in self.store.record_ids().await? {
            report.examined += 1;
            match self.purge_one(id, now).await {
                Ok(Purge::Done(reason)) => {
                    // The purge already removed its trash entry.
                    in_trash.remove(&id);
                    match reason {
                        PurgeReason::Retention => report.purged_retention += 1,
                        PurgeReason::Terminal(_) => report.purged_terminal += 1,
                    }
                }
                Ok(Purge::Changed) => report.skipped += 1,
                Ok(Purge::Kept(record)) => {
                    if record.deleted_at.is_some() && !in_trash.contains(&id) {
                        match self.recreate_trash(&record).await {
                            Ok(()) => report.recreated_trash += 1,
                            Err(e) => {
                                report.failed += 1;
                                warn!(secret_id = %id, error = %e, "failed to recreate trash entry");
                            }
                        }
                    }
                }
                Ok(Purge::Missing) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(secret_id = %id, error = %e, "sweep failed for secret");
                }
            }
        }

        for entry in trash.iter().filter(|entry| in_trash.contains(&entry.secret_id)) {
            match self.reconcile_trash(entry).await {
                Ok(TrashFix::Removed) => report.orphaned_trash += 1,
                Ok(TrashFix::Rewritten) => report.recreated_trash += 1,
                Ok(TrashFix::Unchanged) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(secret_id = %entry.secret_id, error = %e, "sweep failed for trash entry");
                }
            }
        }

        let changed = report.purged() + report.orphaned_trash + report.recreated_trash;
        if changed > 0 || report.failed > 0 {
            info!(
                examined = report.examined,
                purged_retention = report.purged_retention,
                purged_terminal = report.purged_terminal,
                skipped = report.skipped,
                orphaned_trash = report.orphaned_trash,
                recreated_trash = report.recreated_trash,
                failed = report.failed,
                "retention sweep complete"
            );
        } else {
            debug!(examined = report.examined, "retention sweep found nothing to purge");
        }
        Ok(report)
    }

    /// Purge a single record if it is dead at `now`.
    ///
    /// Returns the reason when the record was purged, `None` when it was kept,
    /// missing, or changed concurrently.
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors.
    pub async fn purge_if_terminal(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PurgeReason>, EngineError> {
        match self.purge_one(id, now).await? {
            Purge::Done(reason) => Ok(Some(reason)),
            Purge::Kept(_) | Purge::Changed | Purge::Missing => Ok(None),
        }
    }

    /// Bring one trash entry in line with its record, read just now.
    ///
    /// The entry is removed when the record is gone or live, and rewritten
    /// when the record was deleted again at a different instant. A removal
    /// that races a fresh delete is repaired by the next pass, which finds a
    /// deleted record with no entry.
    async fn reconcile_trash(&self, entry: &TrashEntry) -> Result<TrashFix, EngineError> {
        let deleted = self
            .store
            .load(entry.secret_id)
            .await?
            .and_then(|current| current.record.deleted_at.map(|at| (current.record, at)));
        match deleted {
            None => {
                self.store.delete_trash(entry.secret_id).await?;
                Ok(TrashFix::Removed)
            }
            Some((record, deleted_at)) if deleted_at != entry.deleted_at => {
                self.recreate_trash(&record).await?;
                Ok(TrashFix::Rewritten)
            }
            Some(_) => Ok(TrashFix::Unchanged),
        }
    }

    async fn recreate_trash(&self, record: &SecretRecord) -> Result<(), EngineError> {
        let Some(deleted_at) = record.deleted_at else {
            return Ok(());
        };
        let entry = TrashEntry::new(record, record.deleted_by.clone(), deleted_at);
        self.store.put_trash(&entry).await?;
        info!(secret_id = %record.id, "recreated missing trash entry");
        Ok(())
    }

    async fn purge_one(&self, id: Uuid, now: DateTime<Utc>) -> Result<Purge, EngineError> {
        let Some(current) = self.store.load(id).await? else {
            return Ok(Purge::Missing);
        };
        let Some(reason) = purge_reason(&current.record, now) else {
            return Ok(Purge::Kept(Box::new(current.record)));
        };
        self.purge(&current, reason).await
    }

    async fn purge(
        &self,
        current: &Versioned,
        reason: PurgeReason,
    ) -> Result<Purge, EngineError> {
        let record = &current.record;
        if !self.store.remove(current).await? {
            debug!(secret_id = %record.id, "secret changed during sweep, skipping");
            return Ok(Purge::Changed);
        }
        self.store.delete_trash(record.id).await?;

        let entry = AccessLogEntry::new(
            record,
            AccessAction::Purge,
            AccessOutcome::Success,
            &RequestContext::anonymous(),
            self.access_log.next_timestamp(),
        );
        self.access_log.record(&entry).await;

        match reason {
            PurgeReason::Retention => {
                info!(secret_id = %record.id, org = %record.organization_id, "purged secret past trash retention");
            }
            PurgeReason::Terminal(denial) => {
                info!(secret_id = %record.id, org = %record.organization_id, reason = %denial, "purged terminal secret");
            }
        }
        Ok(Purge::Done(reason))
    }
}

enum TrashFix {
    Removed,
    Rewritten,
    Unchanged,
}

enum Purge {
    Done(PurgeReason),
    Kept(Box<SecretRecord>),
    Changed,
    Missing,
}
