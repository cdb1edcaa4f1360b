//! Background retention sweep worker.
//!
//! Runs [`RetentionSweeper::sweep`] on a fixed interval until shutdown is
//! signalled. If storage is unreachable, a tick retries with exponential
//! backoff (1s, 2s, 4s) before giving up until the next tick. A
//! consecutive-failure counter escalates log severity so operators notice a
//! persistent outage without being spammed by transient blips.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use shroud_core::{RetentionSweeper, SweepReport};

/// Maximum retries per tick when the storage backend is unreachable.
pub const SWEEP_MAX_RETRIES: u32 = 3;

/// Consecutive failed ticks before failures are logged as errors.
const ESCALATE_AFTER: u32 = 5;

/// Sweep every `interval` until `shutdown` changes.
pub async fn sweep_worker(
    sweeper: RetentionSweeper,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut consecutive_failures: u32 = 0;
    info!(interval_secs = interval.as_secs(), "retention sweep worker started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match retry_sweep(&sweeper, &mut shutdown).await {
                    Ok(None) => {
                        info!("retention sweep worker shutting down");
                        return;
                    }
                    Ok(Some(report)) => {
                        consecutive_failures = 0;
                        if report.failed > 0 {
                            warn!(failed = report.failed, "retention sweep skipped secrets after errors");
                        }
                    }
                    Err(last_err) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        if consecutive_failures >= ESCALATE_AFTER {
                            error!(
                                error = %last_err,
                                consecutive_failures,
                                "retention sweep persistently failing, storage may be down"
                            );
                        } else {
                            warn!(
                                error = %last_err,
                                consecutive_failures,
                                retries = SWEEP_MAX_RETRIES,
                                "retention sweep failed after retries, will retry next tick"
                            );
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("retention sweep worker shutting down");
                return;
            }
        }
    }
}

/// Attempt one sweep with exponential backoff. Returns:
/// - `Ok(Some(report))` on success
/// - `Ok(None)` if shutdown was signalled during a backoff
/// - `Err(last_error)` if all retries were exhausted
async fn retry_sweep(
    sweeper: &RetentionSweeper,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<SweepReport>, String> {
    let mut last_err = String::new();

    for attempt in 0..=SWEEP_MAX_RETRIES {
        match sweeper.sweep(Utc::now()).await {
            Ok(report) => return Ok(Some(report)),
            Err(e) => {
                last_err = e.to_string();
                if attempt == SWEEP_MAX_RETRIES {
                    break;
                }

                let backoff = Duration::from_secs(1u64 << attempt);
                debug!(
                    attempt = attempt.saturating_add(1),
                    max = SWEEP_MAX_RETRIES.saturating_add(1),
                    backoff_secs = backoff.as_secs(),
                    error = %e,
                    "retention sweep failed, retrying"
                );

                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => return Ok(None),
                }
            }
        }
    }

    Err(last_err)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use shroud_core::audit::RequestContext;
    use shroud_core::{CreateSecret, EngineError, LifecycleCoordinator, ViewOutcome};
    use shroud_storage::MemoryBackend;
    use zeroize::Zeroizing;

    use super::*;

    #[tokio::test]
    async fn worker_purges_spent_secrets_and_stops_on_shutdown() {
        let coordinator = LifecycleCoordinator::new(Arc::new(MemoryBackend::new()));
        let created = coordinator
            .create(
                CreateSecret {
                    organization_id: "org-1".to_owned(),
                    team_id: None,
                    name: "token".to_owned(),
                    plaintext: Zeroizing::new("abc".to_owned()),
                    password: Zeroizing::new("pw".to_owned()),
                    max_views: Some(1),
                    expires_at: None,
                    burn_on_read: false,
                },
                &RequestContext::anonymous(),
            )
            .await
            .unwrap();
        let outcome = coordinator
            .view(created.id, "pw", &RequestContext::anonymous())
            .await
            .unwrap();
        assert!(matches!(outcome, ViewOutcome::Revealed(_)));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_worker(
            coordinator.sweeper().clone(),
            rx,
            Duration::from_millis(10),
        ));

        let mut purged = false;
        for _ in 0..200 {
            if matches!(
                coordinator.summary(created.id).await,
                Err(EngineError::NotFound { .. })
            ) {
                purged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(purged);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
